//! Payload validation and recipient normalization.

use relay_channels::OutboundMessage;
use relay_core::config::{WhatsAppConfig, DEFAULT_COUNTRY_CODE, DEFAULT_LOCAL_NUMBER_LENGTH};
use serde_json::Value;

use crate::{
    error::{Result, SchedulerError},
    types::{JobType, ScheduledJob},
};

/// How bare local numbers are turned into international ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneRules {
    pub country_code: String,
    /// Digit count of a number written without its country code.
    pub local_length: usize,
}

impl Default for PhoneRules {
    fn default() -> Self {
        Self {
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
            local_length: DEFAULT_LOCAL_NUMBER_LENGTH,
        }
    }
}

impl From<&WhatsAppConfig> for PhoneRules {
    fn from(config: &WhatsAppConfig) -> Self {
        Self {
            country_code: config
                .default_country_code
                .chars()
                .filter(char::is_ascii_digit)
                .collect(),
            local_length: config.local_number_length,
        }
    }
}

/// Strip everything but digits; a local-length number gets the country code.
///
/// Returns `None` when no digits remain.
pub fn normalize_phone(raw: &str, rules: &PhoneRules) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    if digits.len() == rules.local_length {
        Some(format!("{}{digits}", rules.country_code))
    } else {
        Some(digits)
    }
}

/// Build the message a whatsapp job should send, or explain why it cannot.
///
/// The phone may be a string or a bare JSON number. At least one of
/// `message` (payload) or media (`job.media_url`, else `payload.media_url`)
/// must be present.
pub fn outbound_for(job: &ScheduledJob, rules: &PhoneRules) -> Result<OutboundMessage> {
    if job.job_type != JobType::Whatsapp {
        return Err(SchedulerError::Validation(format!(
            "no dispatcher for job type {}",
            job.job_type
        )));
    }

    let payload = job
        .payload
        .as_object()
        .ok_or_else(|| SchedulerError::Validation("whatsapp payload must be an object".to_string()))?;

    let raw_phone = match payload.get("phone") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => {
            return Err(SchedulerError::Validation(
                "whatsapp payload phone must be a string".to_string(),
            ))
        }
        None => {
            return Err(SchedulerError::Validation(
                "whatsapp payload is missing phone".to_string(),
            ))
        }
    };
    let recipient = normalize_phone(&raw_phone, rules).ok_or_else(|| {
        SchedulerError::Validation(format!("phone {raw_phone:?} contains no digits"))
    })?;

    let body = non_blank(payload.get("message"));
    let media_url = job
        .media_url
        .clone()
        .filter(|m| !m.trim().is_empty())
        .or_else(|| non_blank(payload.get("media_url")));

    if body.is_none() && media_url.is_none() {
        return Err(SchedulerError::Validation(
            "whatsapp job needs a message or media".to_string(),
        ));
    }

    Ok(OutboundMessage {
        recipient,
        body,
        media_url,
    })
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
}
