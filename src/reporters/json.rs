//! JSON reporter
//!
//! Every document is emitted as pretty-printed JSON for piping to jq or
//! other tooling.

use anyhow::Result;
use serde::Serialize;

pub fn render<T: Serialize>(document: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(document)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporters::tests::{test_plan, test_report, test_summary};

    #[test]
    fn test_analysis_json_fields() {
        let json_str = render(&test_report()).expect("render JSON");
        let parsed: serde_json::Value = serde_json::from_str(&json_str).expect("parse JSON");
        assert_eq!(parsed["summary"]["critical"], 1);
        assert_eq!(parsed["violations"][0]["severity"], "critical");
        assert_eq!(parsed["health"]["scope"]["kind"], "graph");
        assert_eq!(parsed["layers"]["core"], 1);
    }

    #[test]
    fn test_plan_json_round_trips() {
        let plan = test_plan();
        let json_str = render(&plan).unwrap();
        let back: crate::planning::Plan = serde_json::from_str(&json_str).unwrap();
        assert_eq!(back, plan);
    }

    #[test]
    fn test_summary_json_outcome() {
        let parsed: serde_json::Value =
            serde_json::from_str(&render(&test_summary()).unwrap()).unwrap();
        assert_eq!(parsed["outcome"], "aborted");
        assert_eq!(parsed["blocked_by_verification"], true);
    }
}
