//! Alert event formatting

use super::format_timestamp;
use crate::fusion::AlertEvent;

/// One human-readable line
pub fn format_text(event: &AlertEvent) -> String {
    let start = format_timestamp((event.start_time * 1000.0) as i64);
    let end = format_timestamp((event.end_time * 1000.0) as i64);

    let verdict = if event.threat_detected {
        event
            .severity
            .map_or_else(|| "THREAT".to_string(), |s| s.to_string())
    } else if event.suppressed {
        "suppressed".to_string()
    } else {
        "clear".to_string()
    };

    let sources = event
        .contributing_sources
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join("+");

    let mut line = format!(
        "[{} --> {}] chunk {} {} {} ({:.2}) sources={} latency={}ms",
        start,
        end,
        event.chunk_id,
        verdict,
        event.label,
        event.confidence,
        if sources.is_empty() { "-" } else { sources.as_str() },
        event.latency_ms
    );
    if !event.matched_terms.is_empty() {
        let terms: Vec<&str> = event.matched_terms.iter().map(String::as_str).collect();
        line.push_str(&format!(" terms=\"{}\"", terms.join("\", \"")));
    }
    if event.degraded {
        line.push_str(" DEGRADED");
    }
    line
}

/// One JSON object per line
pub fn format_json(event: &AlertEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| {
        format!(
            "{{\"chunk_id\": {}, \"threat_detected\": {}}}",
            event.chunk_id, event.threat_detected
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{Label, Source};
    use crate::speech::Severity;

    fn event() -> AlertEvent {
        AlertEvent {
            chunk_id: 3,
            timestamp: 1_700_000_000_000,
            start_time: 3.0,
            end_time: 5.0,
            threat_detected: true,
            severity: Some(Severity::Threat),
            confidence: 0.85,
            contributing_sources: [Source::NonSpeech].into_iter().collect(),
            latency_ms: 120,
            degraded: false,
            suppressed: false,
            label: Label::Screaming,
            matched_terms: Default::default(),
        }
    }

    #[test]
    fn test_format_text() {
        let text = format_text(&event());
        assert_eq!(
            text,
            "[00:03.000 --> 00:05.000] chunk 3 THREAT screaming (0.85) sources=non_speech latency=120ms"
        );
    }

    #[test]
    fn test_format_text_flags() {
        let mut e = event();
        e.threat_detected = false;
        e.suppressed = true;
        e.degraded = true;
        e.matched_terms.insert("kill".into());
        let text = format_text(&e);
        assert!(text.contains("suppressed"));
        assert!(text.contains("terms=\"kill\""));
        assert!(text.ends_with("DEGRADED"));
    }

    #[test]
    fn test_format_json() {
        let json: serde_json::Value = serde_json::from_str(&format_json(&event())).unwrap();
        assert_eq!(json["chunk_id"], 3);
        assert_eq!(json["severity"], "THREAT");
        assert_eq!(json["label"], "screaming");
        assert_eq!(json["contributing_sources"][0], "NON_SPEECH");
    }
}
