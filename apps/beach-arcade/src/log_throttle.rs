use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputLogKind {
    UnmappedKey,
    UnmappedButton,
    ProtocolError,
}

impl InputLogKind {
    fn interval(self) -> Duration {
        match self {
            InputLogKind::UnmappedKey => Duration::from_secs(5),
            InputLogKind::UnmappedButton => Duration::from_secs(5),
            InputLogKind::ProtocolError => Duration::from_secs(1),
        }
    }
}

#[derive(Eq, PartialEq, Hash)]
struct LogKey {
    kind: InputLogKind,
    session_id: String,
}

static INPUT_LOG_MEMORY: Lazy<Mutex<HashMap<LogKey, Instant>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// A viewer holding down an unmapped key would otherwise emit one warning
/// per autorepeat; this caps it to one line per kind and session per interval.
pub fn should_log_input_event(kind: InputLogKind, session_id: &str) -> bool {
    let mut guard = INPUT_LOG_MEMORY.lock();
    let key = LogKey {
        kind,
        session_id: session_id.to_string(),
    };
    let now = Instant::now();
    if let Some(last) = guard.get(&key) {
        if now.duration_since(*last) < kind.interval() {
            return false;
        }
    }
    guard.insert(key, now);
    true
}

/// Drops throttle state once a session is gone.
pub fn forget_session(session_id: &str) {
    INPUT_LOG_MEMORY
        .lock()
        .retain(|key, _| key.session_id != session_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_warning_within_interval_is_suppressed() {
        let session = "throttle-a";
        assert!(should_log_input_event(InputLogKind::UnmappedKey, session));
        assert!(!should_log_input_event(InputLogKind::UnmappedKey, session));
        assert!(should_log_input_event(InputLogKind::UnmappedButton, session));
        forget_session(session);
        assert!(should_log_input_event(InputLogKind::UnmappedKey, session));
    }
}
