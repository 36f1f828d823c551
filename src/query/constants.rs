//! Metric resource identifiers (MRIs) for the metrics backed datasets.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

pub const SELF_TIME_LIGHT: &str = "d:spans/exclusive_time_light@millisecond";

pub const TRANSACTION_DIMENSION: &str = "transaction";

pub static SPAN_METRICS_MAP: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        ("user", "s:spans/user@none"),
        ("span.self_time", "d:spans/exclusive_time@millisecond"),
        ("span.duration", "d:spans/duration@millisecond"),
        (
            "http.response_content_length",
            "d:spans/http.response_content_length@byte",
        ),
        (
            "http.decoded_response_content_length",
            "d:spans/http.decoded_response_content_length@byte",
        ),
        (
            "http.response_transfer_size",
            "d:spans/http.response_transfer_size@byte",
        ),
        ("cache.item_size", "d:spans/cache.item_size@byte"),
        ("mobile.slow_frames", "g:spans/mobile.slow_frames@none"),
        ("mobile.frozen_frames", "g:spans/mobile.frozen_frames@none"),
        ("mobile.total_frames", "g:spans/mobile.total_frames@none"),
        ("mobile.frames_delay", "g:spans/mobile.frames_delay@second"),
    ])
});

pub static PROFILE_METRICS_MAP: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([("function.duration", "d:profiles/function.duration@millisecond")])
});

/// MRI backing a span field, if the field is a metric.
pub fn span_mri(field: &str) -> Option<&'static str> {
    SPAN_METRICS_MAP.get(field).copied()
}
