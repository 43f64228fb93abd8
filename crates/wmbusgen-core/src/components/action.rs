//! Actions run by meter automations

use serde::Serialize;
use toml::Value;

use crate::declaration::{ComponentKind, IdRef, Identifier};
use crate::plan::{Arg, Emitter};
use crate::registry::{Handle, RegistryError};
use crate::schema::{
    boolean, from_fn, int_range, one_or_many, string, table, Context, Fields, Outcome,
    PathSegment, ValidationErrorKind, Validator,
};

pub const SEND_TELEGRAM_WITH_MQTT: &str = "wmbus_meter.send_telegram_with_mqtt";
pub const MQTT_PUBLISH: &str = "mqtt.publish";

/// Payload published for a telegram: the meter's decoded fields as JSON
pub const METER_JSON_LAMBDA: &str = "return meter.as_json();";

/// Body of an MQTT publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Lambda(String),
}

impl Payload {
    fn arg(&self) -> Arg {
        match self {
            Payload::Text(text) => Arg::Str(text.clone()),
            Payload::Lambda(code) => Arg::Lambda(code.clone()),
        }
    }
}

/// A validated MQTT publish action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionConfig {
    pub id: Identifier,
    /// Action as written, e.g. `mqtt.publish`
    pub name: &'static str,
    pub client: IdRef,
    pub topic: String,
    pub payload: Payload,
    pub qos: i64,
    pub retain: bool,
}

/// One action or a list of actions, each a single-key mapping
pub fn validate_actions(value: &Value, cx: &mut Context<'_>) -> Outcome<Vec<ActionConfig>> {
    one_or_many(from_fn(validate_action)).validate(value, cx)
}

fn validate_action(value: &Value, cx: &mut Context<'_>) -> Outcome<ActionConfig> {
    let table = table(value, cx)?;
    let mut entries = table.iter();
    let (Some((key, body)), None) = (entries.next(), entries.next()) else {
        return cx.fail(ValidationErrorKind::Invalid(
            "An action must be a mapping with exactly one key, the action name".to_string(),
        ));
    };

    let name = match key.as_str() {
        SEND_TELEGRAM_WITH_MQTT => SEND_TELEGRAM_WITH_MQTT,
        MQTT_PUBLISH => MQTT_PUBLISH,
        other => {
            return cx.fail(ValidationErrorKind::InvalidEnumValue {
                field: "action".to_string(),
                value: other.to_string(),
                allowed: vec![SEND_TELEGRAM_WITH_MQTT.to_string(), MQTT_PUBLISH.to_string()],
            })
        }
    };

    cx.nested(PathSegment::Key(key.clone()), |cx| publish(name, body, cx))
}

fn publish(name: &'static str, value: &Value, cx: &mut Context<'_>) -> Outcome<ActionConfig> {
    let mut fields = Fields::new(value, cx)?;
    let client = fields.use_id(cx, "id");
    let topic = fields.required(cx, "topic", string());
    let payload = if name == SEND_TELEGRAM_WITH_MQTT {
        fields.forbid(
            cx,
            "payload",
            ValidationErrorKind::MutuallyExclusiveFields {
                first: "payload".to_string(),
                second: SEND_TELEGRAM_WITH_MQTT.to_string(),
                hint: "If you want to specify payload, use generic 'mqtt.publish' action"
                    .to_string(),
            },
        );
        Payload::Lambda(METER_JSON_LAMBDA.to_string())
    } else {
        Payload::Text(fields.required(cx, "payload", string()))
    };
    let qos = fields.optional(cx, "qos", int_range(0, 2)).unwrap_or(0);
    let retain = fields.optional(cx, "retain", boolean()).unwrap_or(false);
    fields.finish(cx)?;

    Ok(ActionConfig {
        id: cx.generate_id(ComponentKind::MqttPublishAction),
        name,
        client,
        topic,
        payload,
        qos,
        retain,
    })
}

/// Construct the action and add it to `automation`
pub fn emit(
    config: &ActionConfig,
    automation: &Handle,
    emitter: &mut Emitter<'_>,
) -> Result<(), RegistryError> {
    let client = emitter.resolve(&config.client, ComponentKind::MqttClient, "id")?;
    let action = emitter.construct(
        &config.id,
        ComponentKind::MqttPublishAction,
        vec![Arg::Handle(client)],
    )?;
    emitter.set(&action, "set_topic", Arg::Str(config.topic.clone()));
    emitter.set(&action, "set_payload", config.payload.arg());
    emitter.set(&action, "set_qos", Arg::Int(config.qos));
    emitter.set(&action, "set_retain", Arg::Bool(config.retain));
    emitter.attach(automation, "add_action", action);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::IdGenerator;
    use crate::schema::FieldPath;

    fn run(src: &str) -> Outcome<Vec<ActionConfig>> {
        let table: toml::Table = toml::from_str(src).unwrap();
        let mut ids = IdGenerator::new();
        let mut cx = Context::new(FieldPath::root().key("then"), &[], &mut ids);
        validate_actions(&table["then"], &mut cx)
    }

    #[test]
    fn test_send_telegram_fills_payload() {
        let actions = run(
            r#"then = { "wmbus_meter.send_telegram_with_mqtt" = { topic = "wmbus/telegram" } }"#,
        )
        .unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].payload, Payload::Lambda(METER_JSON_LAMBDA.to_string()));
        assert_eq!(actions[0].client, IdRef::Default);
        assert_eq!(actions[0].qos, 0);
        assert!(!actions[0].retain);
    }

    #[test]
    fn test_send_telegram_rejects_payload() {
        let errors = run(
            r#"then = [{ "wmbus_meter.send_telegram_with_mqtt" = { topic = "t", payload = "x" } }]"#,
        )
        .unwrap_err();
        let error = errors.iter().next().unwrap();
        assert_eq!(
            error.path.to_string(),
            "then[0].wmbus_meter.send_telegram_with_mqtt.payload"
        );
        assert!(matches!(
            error.kind,
            ValidationErrorKind::MutuallyExclusiveFields { .. }
        ));
    }

    #[test]
    fn test_mqtt_publish_requires_payload() {
        let errors = run(r#"then = { "mqtt.publish" = { topic = "t", qos = 1 } }"#).unwrap_err();
        assert_eq!(
            errors.kinds().collect::<Vec<_>>(),
            vec![&ValidationErrorKind::MissingField]
        );
    }

    #[test]
    fn test_unknown_action() {
        let errors = run(r#"then = { "logger.log" = { format = "hi" } }"#).unwrap_err();
        assert!(matches!(
            errors.kinds().next(),
            Some(ValidationErrorKind::InvalidEnumValue { .. })
        ));
    }
}
