//! `wmbus_meter`: one physical meter, its decryption key and telegram automations

use toml::Value;

use super::action::{self, ActionConfig};
use super::common::driver;
use crate::declaration::{ComponentKind, IdRef, Identifier};
use crate::plan::{Arg, Emitter};
use crate::registry::RegistryError;
use crate::schema::{
    from_fn, one_of, one_or_many, string_strict, Context, Fields, Outcome, ValidationErrorKind,
    Validator,
};

pub const MODES: [&str; 2] = ["c1", "t1"];

/// Number of digits in a meter address
pub const METER_ID_DIGITS: usize = 8;

/// Length of an AES-128 key in bytes
pub const KEY_BYTES: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct TelegramAutomation {
    pub trigger_id: Identifier,
    pub automation_id: Identifier,
    pub actions: Vec<ActionConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeterConfig {
    pub id: Identifier,
    pub radio: IdRef,
    /// Zero padded, uppercase hex
    pub meter_id: String,
    pub driver_type: String,
    /// 32 uppercase hex digits
    pub key: Option<String>,
    pub mode: Option<String>,
    pub on_telegram: Vec<TelegramAutomation>,
}

impl MeterConfig {
    /// Driver specification handed to the meter library, `type[:mode]`
    pub fn driver(&self) -> String {
        match &self.mode {
            Some(mode) => format!("{}:{}", self.driver_type, mode),
            None => self.driver_type.clone(),
        }
    }
}

/// Normalize a meter address to exactly eight hex digits
///
/// Strings are read as hex with an optional `0x` prefix; integers are
/// taken digit for digit, the way addresses are printed on the meter.
pub fn normalize_meter_id(value: &Value) -> Result<String, ValidationErrorKind> {
    let digits = match value {
        Value::Integer(i) if *i >= 0 => i.to_string(),
        Value::String(s) => {
            let s = s.trim();
            s.strip_prefix("0x")
                .or_else(|| s.strip_prefix("0X"))
                .unwrap_or(s)
                .to_string()
        }
        other => {
            return Err(ValidationErrorKind::InvalidType {
                expected: "hexadecimal meter id",
                found: other.type_str(),
            })
        }
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationErrorKind::Invalid(format!(
            "Meter id '{}' must be a hexadecimal number",
            digits
        )));
    }
    if digits.len() > METER_ID_DIGITS {
        return Err(ValidationErrorKind::Invalid(format!(
            "Meter id '{}' is longer than {} digits",
            digits, METER_ID_DIGITS
        )));
    }
    Ok(format!(
        "{:0>width$}",
        digits.to_uppercase(),
        width = METER_ID_DIGITS
    ))
}

fn meter_id(value: &Value, cx: &mut Context<'_>) -> Outcome<String> {
    normalize_meter_id(value).or_else(|kind| cx.fail(kind))
}

/// Canonical form of a key given as hex digits
pub fn normalize_hex_key(raw: &str) -> Result<String, ValidationErrorKind> {
    let invalid = |message: &str| ValidationErrorKind::InvalidKeyFormat(message.to_string());
    if raw.len().div_ceil(2) != KEY_BYTES {
        return Err(invalid("Key must consist of 16 hexadecimal numbers"));
    }
    if raw.len() % 2 != 0 {
        return Err(invalid("Key must be format XX"));
    }
    let bytes = hex::decode(raw).map_err(|_| invalid("Key must be hex values from 00 to FF"))?;
    Ok(hex::encode_upper(bytes))
}

/// Canonical form of a key given as 16 characters of raw text
pub fn normalize_text_key(raw: &str) -> Result<String, ValidationErrorKind> {
    normalize_hex_key(&hex::encode(raw.as_bytes()))
}

fn hex_key(value: &Value, cx: &mut Context<'_>) -> Outcome<String> {
    let raw = string_strict().validate(value, cx)?;
    normalize_hex_key(&raw).or_else(|kind| cx.fail(kind))
}

fn text_key(value: &Value, cx: &mut Context<'_>) -> Outcome<String> {
    let raw = string_strict().validate(value, cx)?;
    normalize_text_key(&raw).or_else(|kind| cx.fail(kind))
}

/// Raw text first, then hex; errors of the hex reading are reported
fn key(value: &Value, cx: &mut Context<'_>) -> Outcome<String> {
    from_fn(text_key).or(from_fn(hex_key)).validate(value, cx)
}

fn automation(value: &Value, cx: &mut Context<'_>) -> Outcome<TelegramAutomation> {
    let mut fields = Fields::new(value, cx)?;
    let trigger_id = fields.declare_id(cx, "trigger_id", ComponentKind::TelegramTrigger);
    let automation_id = fields.declare_id(cx, "automation_id", ComponentKind::Automation);
    let actions = fields.required(cx, "then", from_fn(action::validate_actions));
    fields.finish(cx)?;

    Ok(TelegramAutomation {
        trigger_id,
        automation_id,
        actions,
    })
}

pub fn validate(value: &Value, cx: &mut Context<'_>) -> Outcome<MeterConfig> {
    let mut fields = Fields::new(value, cx)?;
    let id = fields.declare_id(cx, "id", ComponentKind::Meter);
    let radio = fields.use_id(cx, "radio_id");
    let meter_id = fields.required(cx, "meter_id", from_fn(meter_id));
    let driver_type = fields.required(cx, "type", driver());
    let key = fields.optional(cx, "key", from_fn(key));
    let mode = fields.optional(cx, "mode", one_of(MODES).lower());
    let on_telegram = fields
        .optional(cx, "on_telegram", one_or_many(from_fn(automation)))
        .unwrap_or_default();
    fields.finish(cx)?;

    Ok(MeterConfig {
        id,
        radio,
        meter_id,
        driver_type,
        key,
        mode,
        on_telegram,
    })
}

pub fn emit(config: &MeterConfig, emitter: &mut Emitter<'_>) -> Result<(), RegistryError> {
    let radio = emitter.resolve(&config.radio, ComponentKind::Radio, "radio_id")?;
    let meter = emitter.construct(&config.id, ComponentKind::Meter, Vec::new())?;
    emitter.call(
        &meter,
        "set_meter_params",
        vec![
            Arg::Str(config.meter_id.clone()),
            Arg::Str(config.driver()),
            Arg::Str(config.key.clone().unwrap_or_default()),
        ],
    );
    emitter.set(&meter, "set_radio", Arg::Handle(radio));
    emitter.register_component(&meter);

    for automation in &config.on_telegram {
        let trigger = emitter.construct(
            &automation.trigger_id,
            ComponentKind::TelegramTrigger,
            vec![Arg::Handle(meter.clone())],
        )?;
        let handle = emitter.construct(
            &automation.automation_id,
            ComponentKind::Automation,
            vec![Arg::Handle(trigger)],
        )?;
        for action in &automation.actions {
            action::emit(action, &handle, emitter)?;
        }
    }
    Ok(())
}
