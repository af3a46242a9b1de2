use crate::model::{AlertDecision, AlertKind, Reading, ThresholdConfig};

/// Strict crossings only: a temperature equal to a bound is in range.
pub fn evaluate(reading: &Reading, config: &ThresholdConfig) -> AlertDecision {
    let (kind, threshold_breached) = if reading.temperature > config.temp_max {
        (AlertKind::High, Some(config.temp_max))
    } else if reading.temperature < config.temp_min {
        (AlertKind::Low, Some(config.temp_min))
    } else {
        (AlertKind::None, None)
    };

    AlertDecision {
        kind,
        device_id: reading.device_id.clone(),
        temperature: reading.temperature,
        threshold_breached,
    }
}

pub fn alert_message(decision: &AlertDecision) -> Option<String> {
    match decision.kind {
        AlertKind::High => Some(format!(
            "🚨 {} - High Temp {}°C! Cooling ON.",
            decision.device_id, decision.temperature
        )),
        AlertKind::Low => Some(format!(
            "❄️ {} - Low Temp {}°C! Heating ON.",
            decision.device_id, decision.temperature
        )),
        AlertKind::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading(temperature: f64) -> Reading {
        Reading {
            device_id: "room1".to_string(),
            timestamp: Utc::now(),
            temperature,
            humidity: 40.0,
            status: "off".to_string(),
        }
    }

    fn config() -> ThresholdConfig {
        ThresholdConfig {
            device_id: "room1".to_string(),
            temp_min: 20.0,
            temp_max: 30.0,
        }
    }

    #[test]
    fn test_above_max_is_high() {
        let decision = evaluate(&reading(35.0), &config());
        assert_eq!(decision.kind, AlertKind::High);
        assert_eq!(decision.threshold_breached, Some(30.0));
        assert_eq!(decision.temperature, 35.0);
        assert_eq!(decision.device_id, "room1");
    }

    #[test]
    fn test_below_min_is_low() {
        let decision = evaluate(&reading(12.5), &config());
        assert_eq!(decision.kind, AlertKind::Low);
        assert_eq!(decision.threshold_breached, Some(20.0));
    }

    #[test]
    fn test_in_range_is_none() {
        let decision = evaluate(&reading(25.0), &config());
        assert_eq!(decision.kind, AlertKind::None);
        assert_eq!(decision.threshold_breached, None);
    }

    #[test]
    fn test_bounds_are_inside_range() {
        assert_eq!(evaluate(&reading(30.0), &config()).kind, AlertKind::None);
        assert_eq!(evaluate(&reading(20.0), &config()).kind, AlertKind::None);
    }

    #[test]
    fn test_just_past_bounds_breach() {
        let above = 30.0_f64 + f64::EPSILON * 32.0;
        let below = 20.0_f64 - f64::EPSILON * 32.0;
        assert_eq!(evaluate(&reading(above), &config()).kind, AlertKind::High);
        assert_eq!(evaluate(&reading(below), &config()).kind, AlertKind::Low);
    }

    #[test]
    fn test_sweep_matches_rule() {
        let config = config();
        for tenth in -100..=500 {
            let t = tenth as f64 / 10.0;
            let expected = if t > 30.0 {
                AlertKind::High
            } else if t < 20.0 {
                AlertKind::Low
            } else {
                AlertKind::None
            };
            assert_eq!(evaluate(&reading(t), &config).kind, expected, "t = {}", t);
        }
    }

    #[test]
    fn test_inverted_config_prefers_high() {
        let inverted = ThresholdConfig {
            device_id: "room1".to_string(),
            temp_min: 30.0,
            temp_max: 20.0,
        };
        assert_eq!(evaluate(&reading(25.0), &inverted).kind, AlertKind::High);
    }

    #[test]
    fn test_every_breach_alerts() {
        let config = config();
        let kinds: Vec<AlertKind> = [31.0, 29.0, 31.0, 31.0]
            .iter()
            .map(|t| evaluate(&reading(*t), &config).kind)
            .collect();
        assert_eq!(
            kinds,
            vec![AlertKind::High, AlertKind::None, AlertKind::High, AlertKind::High]
        );
    }

    #[test]
    fn test_alert_messages() {
        let high = evaluate(&reading(35.0), &config());
        assert_eq!(
            alert_message(&high).unwrap(),
            "🚨 room1 - High Temp 35°C! Cooling ON."
        );
        let low = evaluate(&reading(15.5), &config());
        assert_eq!(
            alert_message(&low).unwrap(),
            "❄️ room1 - Low Temp 15.5°C! Heating ON."
        );
        assert!(alert_message(&evaluate(&reading(25.0), &config())).is_none());
    }
}
