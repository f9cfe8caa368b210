//! `time` tool: current UTC time in several notations.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use super::{Tool, ToolError, ToolFuture};
use crate::mcp::protocol::{ContentItem, ToolDescriptor};

/// Reports the current UTC time.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeTool;

/// Requested text rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeFormat {
    Iso8601,
    Rfc2822,
    Epoch,
}

impl TimeFormat {
    /// Unrecognized names fall back to ISO 8601.
    fn from_arguments(arguments: &Value) -> Result<Self, ToolError> {
        match arguments.get("format") {
            None | Some(Value::Null) => Ok(Self::Iso8601),
            Some(Value::String(name)) => Ok(match name.as_str() {
                "rfc2822" => Self::Rfc2822,
                "epoch" => Self::Epoch,
                _ => Self::Iso8601,
            }),
            Some(_) => Err(ToolError::new("format must be a string")),
        }
    }
}

/// Content list for `now` rendered in `format`.
fn render(now: DateTime<Utc>, format: TimeFormat) -> Vec<ContentItem> {
    let iso = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let rfc2822 = now.to_rfc2822();
    let epoch = now.timestamp();

    let text = match format {
        TimeFormat::Iso8601 => format!("UTC time: {iso}"),
        TimeFormat::Rfc2822 => format!("UTC time: {rfc2822}"),
        TimeFormat::Epoch => format!("UTC time (epoch): {epoch}"),
    };

    vec![
        ContentItem::Json {
            json: json!({
                "utcIso": iso,
                "epochSeconds": epoch,
                "rfc2822": rfc2822,
            }),
        },
        ContentItem::Text { text },
    ]
}

impl Tool for TimeTool {
    fn describe(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "time".into(),
            description: "Returns the current UTC time.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "format": {
                        "type": "string",
                        "enum": ["iso8601", "rfc2822", "epoch"],
                        "description": "Optional rendering of the text item"
                    }
                }
            }),
        }
    }

    fn invoke(&self, arguments: Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let format = TimeFormat::from_arguments(&arguments)?;
            Ok(render(Utc::now(), format))
        })
    }
}
