use tag_gateway_models::{constants::UPDATE_SUFFIX, TagValue};
use tokio::sync::mpsc;

/// Administrative action on a controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerCommand {
    Stop,
    StartPredict,
    Start,
    SetOptimization { enabled: bool },
    SetVariableState { variable: String, on: bool },
    SetLimits { variable: String, property: String, value: f64 },
    SetOptimizationVar { variable: String, property: String, value: f64 },
}

impl ControllerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ControllerCommand::Stop => "stop",
            ControllerCommand::StartPredict => "start-predict",
            ControllerCommand::Start => "start",
            ControllerCommand::SetOptimization { .. } => "optimization",
            ControllerCommand::SetVariableState { .. } => "variables/state",
            ControllerCommand::SetLimits { .. } => "variables/limits",
            ControllerCommand::SetOptimizationVar { .. } => "optimization-vars",
        }
    }
}

/// A decoded command addressed to one controller on one environment.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedCommand {
    pub controller_id: String,
    pub env: String,
    pub command: ControllerCommand,
}

const LIMIT_PROPERTIES: [&str; 3] = ["limit_bottom", "limit_top", "set_point"];
const OPTIMIZATION_PROPERTIES: [&str; 3] = ["coef_line_opt", "coef_quad_opt", "target"];

#[inline]
fn code(value: f64) -> Option<i64> {
    (value.is_finite() && value.fract() == 0.0).then_some(value as i64)
}

/// Decodes a mapping key (suffix already stripped) and value into a command.
///
/// Codes are 1-based: `State` 1 stop, 2 start-predict, 3 start; `OptimizationState`
/// 1 disable, 2 enable; `<variable>.state` 1 OFF, 2 ON. Anything else is logged and
/// dropped.
pub fn decode(command_key: &str, value: f64) -> Option<ControllerCommand> {
    let segments: Vec<&str> = command_key.split('.').collect();
    if let [command] = segments.as_slice() {
        let decoded = match (*command, code(value)) {
            ("State", Some(1)) => Some(ControllerCommand::Stop),
            ("State", Some(2)) => Some(ControllerCommand::StartPredict),
            ("State", Some(3)) => Some(ControllerCommand::Start),
            ("OptimizationState", Some(1)) => {
                Some(ControllerCommand::SetOptimization { enabled: false })
            }
            ("OptimizationState", Some(2)) => {
                Some(ControllerCommand::SetOptimization { enabled: true })
            }
            ("State", _) | ("OptimizationState", _) => {
                tracing::warn!(command = %command, value, "Unsupported command value dropped");
                None
            }
            _ => {
                tracing::warn!(command = %command, "Unknown controller command dropped");
                None
            }
        };
        return decoded;
    }

    let variable = segments[0].to_string();
    let property = segments[1..].join(".");
    match property.as_str() {
        "state" => match code(value) {
            Some(1) => Some(ControllerCommand::SetVariableState { variable, on: false }),
            Some(2) => Some(ControllerCommand::SetVariableState { variable, on: true }),
            _ => {
                tracing::warn!(variable = %variable, value, "Unsupported variable state dropped");
                None
            }
        },
        p if LIMIT_PROPERTIES.contains(&p) => Some(ControllerCommand::SetLimits {
            variable,
            property,
            value,
        }),
        p if OPTIMIZATION_PROPERTIES.contains(&p) => Some(ControllerCommand::SetOptimizationVar {
            variable,
            property,
            value,
        }),
        _ => {
            tracing::warn!(variable = %variable, property = %property, "Unknown variable property dropped");
            None
        }
    }
}

/// Turns accepted tag updates into controller commands.
///
/// Commands are queued to a dispatcher task, so routing never blocks or fails the
/// caller.
#[derive(Clone)]
pub struct ChangeRouter {
    tx: mpsc::UnboundedSender<RoutedCommand>,
}

impl ChangeRouter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RoutedCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Routes `current` when `mapping_key` carries the update suffix and its value
    /// differs from `previous`. A missing previous value always routes.
    pub fn route(
        &self,
        controller_id: &str,
        env: &str,
        mapping_key: &str,
        previous: Option<&TagValue>,
        current: &TagValue,
    ) {
        let Some(command_key) = mapping_key.strip_suffix(UPDATE_SUFFIX) else {
            return;
        };
        let Some(value) = current.value else {
            return;
        };
        if previous.and_then(|p| p.value) == Some(value) {
            return;
        }

        let Some(command) = decode(command_key, value) else {
            return;
        };
        tracing::debug!(controller_id, env, key = mapping_key, command = command.name(), "Routing controller command");
        let routed = RoutedCommand {
            controller_id: controller_id.to_string(),
            env: env.to_string(),
            command,
        };
        if self.tx.send(routed).is_err() {
            tracing::error!(controller_id, env, "Controller dispatcher is gone; command dropped");
        }
    }
}
