//! The schedule emitter.
//!
//! One shared worker ticks the whole process: the "every minute"
//! heartbeat is independent of any rule set, so `worker_config` is null
//! and every scheduled workflow rides the same loop. Rule matching
//! happens per workflow in `payload`, in each rule's own timezone.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, SecondsFormat, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use conveyor_core::types::{EmitterConfig, EventArgs, EventPayload, WorkerArgs};

use crate::{Emitter, EmitterError, EmitterKind, EventStream};

/// One schedule rule. `cron` matches recurring times; `iso` matches a
/// single instant at minute precision. At least one must be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso: Option<String>,
}

pub struct ScheduleEmitter;

impl Emitter for ScheduleEmitter {
    fn kind(&self) -> EmitterKind {
        EmitterKind::Schedule
    }

    fn worker_config(
        &self,
        _event_name: &str,
        config: &EmitterConfig,
    ) -> Result<WorkerArgs, EmitterError> {
        for rule in parse_rules(config)? {
            if rule.cron.is_none() && rule.iso.is_none() {
                return Err(EmitterError::Config(
                    "schedule entry needs a cron or an iso timestamp".to_string(),
                ));
            }
            if let Some(cron) = &rule.cron {
                parse_cron(cron)?;
            }
            let timezone = parse_timezone(rule.timezone.as_deref())?;
            if let Some(iso) = &rule.iso {
                parse_instant(iso, timezone)?;
            }
        }

        // The worker identity carries no rule information on purpose: one
        // clock serves every schedule.
        Ok(Value::Null)
    }

    fn events(&self, _args: WorkerArgs) -> EventStream {
        // The current time is the starting point, so nothing fires until
        // the next minute begins. Sleeping a full minute would drift;
        // a 1-second check keeps the tick aligned at negligible cost.
        stream::unfold(Utc::now(), |previous| async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let now = Utc::now();
                if minute_of(&now) != minute_of(&previous) {
                    let iso = now.to_rfc3339_opts(SecondsFormat::Secs, true);
                    return Some((Ok(Value::String(iso)), now));
                }
            }
        })
        .boxed()
    }

    fn payload(
        &self,
        config: &EmitterConfig,
        args: &EventArgs,
    ) -> Result<EventPayload, EmitterError> {
        let iso = args
            .as_str()
            .ok_or_else(|| EmitterError::Payload(format!("expected a timestamp, got {args}")))?;
        let tick = DateTime::parse_from_rfc3339(iso)
            .map_err(|err| EmitterError::Payload(format!("invalid tick timestamp: {err}")))?
            .with_timezone(&Utc);

        for rule in parse_rules(config)? {
            let timezone = parse_timezone(rule.timezone.as_deref())?;
            let now = truncate_to_minute(tick.with_timezone(&timezone));

            let cron_matched = match &rule.cron {
                Some(cron) => parse_cron(cron)?.includes(now),
                None => false,
            };
            let iso_matched = match &rule.iso {
                Some(iso) => parse_instant(iso, timezone)? == now,
                None => false,
            };

            if cron_matched || iso_matched {
                return Ok(json!({
                    "iso": iso,
                    "m": now.minute(),
                    "h": now.hour(),
                    "dom": now.day(),
                    "mon": now.month(),
                    // Mon = 1; Sun = 7
                    "dow": now.weekday().number_from_monday(),
                }));
            }
        }

        Err(EmitterError::NotSatisfied)
    }
}

fn parse_rules(config: &EmitterConfig) -> Result<Vec<ScheduleRule>, EmitterError> {
    serde_json::from_value(config.clone())
        .map_err(|err| EmitterError::Config(format!("invalid schedule config: {err}")))
}

/// Rules use standard 5-field cron; the underlying matcher wants a seconds
/// field, pinned to 0 to line up with minute ticks.
fn parse_cron(cron: &str) -> Result<Schedule, EmitterError> {
    Schedule::from_str(&format!("0 {cron}"))
        .map_err(|err| EmitterError::Config(format!("invalid cron {cron:?}: {err}")))
}

fn parse_timezone(timezone: Option<&str>) -> Result<Tz, EmitterError> {
    let timezone = timezone.unwrap_or("UTC");
    timezone
        .parse()
        .map_err(|_| EmitterError::Config(format!("invalid timezone: {timezone}")))
}

/// Parses a rule's `iso` entry, using the rule's timezone when the string
/// carries no offset, truncated to minute precision.
fn parse_instant(iso: &str, timezone: Tz) -> Result<DateTime<Tz>, EmitterError> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(iso) {
        return Ok(truncate_to_minute(instant.with_timezone(&timezone)));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(iso, format) {
            return timezone
                .from_local_datetime(&naive)
                .earliest()
                .map(truncate_to_minute)
                .ok_or_else(|| {
                    EmitterError::Config(format!("iso timestamp {iso:?} does not exist in {timezone}"))
                });
        }
    }

    Err(EmitterError::Config(format!("invalid iso timestamp: {iso}")))
}

fn truncate_to_minute<Z: TimeZone>(instant: DateTime<Z>) -> DateTime<Z> {
    instant
        .clone()
        .with_second(0)
        .and_then(|instant| instant.with_nanosecond(0))
        .unwrap_or(instant)
}

fn minute_of(instant: &DateTime<Utc>) -> (i32, u32, u32, u32) {
    (
        instant.year(),
        instant.ordinal(),
        instant.hour(),
        instant.minute(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: &str = "2024-06-01T12:00:00Z";

    fn payload(config: Value) -> Result<EventPayload, EmitterError> {
        ScheduleEmitter.payload(&config, &json!(TICK))
    }

    #[test]
    fn worker_identity_is_shared_across_rule_sets() {
        let emitter = ScheduleEmitter;
        let a = emitter
            .worker_config("schedule", &json!([{"cron": "0 12 * * *"}]))
            .unwrap();
        let b = emitter
            .worker_config("schedule", &json!([{"cron": "*/5 * * * *"}]))
            .unwrap();
        assert_eq!(a, Value::Null);
        assert_eq!(a, b);
    }

    #[test]
    fn matching_cron_fires() {
        let event = payload(json!([{"cron": "0 12 * * *"}])).unwrap();
        assert_eq!(event["m"], json!(0));
        assert_eq!(event["h"], json!(12));
        assert_eq!(event["dom"], json!(1));
        assert_eq!(event["mon"], json!(6));
        // 2024-06-01 is a Saturday.
        assert_eq!(event["dow"], json!(6));
        assert_eq!(event["iso"], json!(TICK));
    }

    #[test]
    fn non_matching_cron_is_not_satisfied() {
        assert!(matches!(
            payload(json!([{"cron": "0 13 * * *"}])),
            Err(EmitterError::NotSatisfied)
        ));
    }

    #[test]
    fn cron_matches_in_the_rules_timezone() {
        // 12:00 UTC on 2024-06-01 is 14:00 in Brussels (CEST).
        let event =
            payload(json!([{"cron": "0 14 * * *", "timezone": "Europe/Brussels"}])).unwrap();
        assert_eq!(event["h"], json!(14));

        assert!(matches!(
            payload(json!([{"cron": "0 12 * * *", "timezone": "Europe/Brussels"}])),
            Err(EmitterError::NotSatisfied)
        ));
    }

    #[test]
    fn iso_rule_matches_at_minute_precision() {
        let event = payload(json!([{"iso": "2024-06-01T12:00"}])).unwrap();
        assert_eq!(event["h"], json!(12));

        assert!(matches!(
            payload(json!([{"iso": "2024-06-01T12:01"}])),
            Err(EmitterError::NotSatisfied)
        ));
    }

    #[test]
    fn iso_rule_uses_the_configured_timezone() {
        let event = payload(
            json!([{"iso": "2024-06-01T14:00", "timezone": "Europe/Brussels"}]),
        )
        .unwrap();
        assert_eq!(event["h"], json!(14));
    }

    #[test]
    fn any_matching_rule_is_enough() {
        let event = payload(json!([
            {"cron": "0 13 * * *"},
            {"cron": "0 12 * * *"},
        ]))
        .unwrap();
        assert_eq!(event["h"], json!(12));
    }

    #[test]
    fn invalid_rules_fail_validation() {
        let emitter = ScheduleEmitter;
        assert!(matches!(
            emitter.worker_config("schedule", &json!([{"cron": "not a cron"}])),
            Err(EmitterError::Config(_))
        ));
        assert!(matches!(
            emitter.worker_config("schedule", &json!([{"cron": "0 12 * * *", "timezone": "Mars/Olympus"}])),
            Err(EmitterError::Config(_))
        ));
        assert!(matches!(
            emitter.worker_config("schedule", &json!([{}])),
            Err(EmitterError::Config(_))
        ));
        assert!(matches!(
            emitter.worker_config("schedule", &json!({"cron": "0 12 * * *"})),
            Err(EmitterError::Config(_))
        ));
    }
}
