//! Calendar tools exposed to the model.
//!
//! Thin argument-parsing wrappers over [`CalendarToolEngine`]. Naive
//! timestamps from the model are parsed here and localized inside the
//! engine with the offset the dispatch context carries. The model supplies
//! neither identity nor offset.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::calendar::CalendarToolEngine;
use crate::error::{CalvoxError, Result};
use crate::timeutil::{self, NowInfo};

use super::{Tool, ToolContext};

const DEFAULT_SLOT_MINUTES: i64 = 30;
const DEFAULT_HORIZON_HOURS: i64 = 24;

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| CalvoxError::Tool(format!("Missing '{key}' argument")))
}

fn optional_i64(args: &Value, key: &str, default: i64) -> i64 {
    args.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
}

/// Report the current date and time. Kept alongside the calendar tools so
/// the model never has to guess "now" when resolving relative dates.
pub struct GetCurrentTimeTool;

#[async_trait]
impl Tool for GetCurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<String> {
        let info = NowInfo::capture();
        Ok(format!(
            "Current date and time: {}\nISO format: {}",
            info.full, info.iso
        ))
    }
}

/// Free/busy check over a concrete interval.
pub struct CheckAvailabilityTool {
    engine: Arc<CalendarToolEngine>,
}

impl CheckAvailabilityTool {
    pub fn new(engine: Arc<CalendarToolEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for CheckAvailabilityTool {
    fn name(&self) -> &str {
        "check_availability"
    }

    fn description(&self) -> &str {
        "Check the user's calendar availability during a specified time period"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "start": {
                    "type": "string",
                    "description": "Start datetime in ISO format (YYYY-MM-DDTHH:MM:SS), user's local time"
                },
                "end": {
                    "type": "string",
                    "description": "End datetime in ISO format (YYYY-MM-DDTHH:MM:SS), user's local time"
                }
            },
            "required": ["start", "end"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let start = timeutil::parse_model_timestamp(required_str(&args, "start")?)?;
        let end = timeutil::parse_model_timestamp(required_str(&args, "end")?)?;
        self.engine
            .check_availability(&ctx.user_id, start, end, ctx.timezone)
            .await
    }
}

/// Gap-finding over a date range.
pub struct FindAvailableSlotsTool {
    engine: Arc<CalendarToolEngine>,
}

impl FindAvailableSlotsTool {
    pub fn new(engine: Arc<CalendarToolEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for FindAvailableSlotsTool {
    fn name(&self) -> &str {
        "find_available_slots"
    }

    fn description(&self) -> &str {
        "Find available time slots for meetings within a date range"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "start": {
                    "type": "string",
                    "description": "Start date in ISO format (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)"
                },
                "end": {
                    "type": "string",
                    "description": "End date in ISO format (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)"
                },
                "duration_minutes": {
                    "type": "integer",
                    "description": "Desired meeting duration in minutes (default: 30)"
                }
            },
            "required": ["start", "end"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let start = timeutil::parse_model_timestamp(required_str(&args, "start")?)?;
        let end = timeutil::parse_model_timestamp(required_str(&args, "end")?)?;
        let duration = optional_i64(&args, "duration_minutes", DEFAULT_SLOT_MINUTES);
        if duration <= 0 {
            return Err(CalvoxError::Tool(
                "'duration_minutes' must be positive".into(),
            ));
        }
        self.engine
            .find_available_slots(&ctx.user_id, start, end, duration, ctx.timezone)
            .await
    }
}

/// Event creation. The only write; its confirmation is spoken back with the
/// wall-clock time the user asked for.
pub struct CreateEventTool {
    engine: Arc<CalendarToolEngine>,
}

impl CreateEventTool {
    pub fn new(engine: Arc<CalendarToolEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for CreateEventTool {
    fn name(&self) -> &str {
        "create_event"
    }

    fn description(&self) -> &str {
        "Create a new event on the user's calendar"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Event title/summary"
                },
                "start": {
                    "type": "string",
                    "description": "Start datetime in ISO format (YYYY-MM-DDTHH:MM:SS), user's local time"
                },
                "end": {
                    "type": "string",
                    "description": "End datetime in ISO format (YYYY-MM-DDTHH:MM:SS), user's local time"
                },
                "description": {
                    "type": "string",
                    "description": "Event description (optional)"
                }
            },
            "required": ["title", "start", "end"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let title = required_str(&args, "title")?;
        let start = timeutil::parse_model_timestamp(required_str(&args, "start")?)?;
        let end = timeutil::parse_model_timestamp(required_str(&args, "end")?)?;
        let description = args.get("description").and_then(|v| v.as_str());
        self.engine
            .create_event(&ctx.user_id, title, start, end, description, ctx.timezone)
            .await
    }
}

/// Upcoming-events listing over a lookahead horizon.
pub struct GetUpcomingEventsTool {
    engine: Arc<CalendarToolEngine>,
}

impl GetUpcomingEventsTool {
    pub fn new(engine: Arc<CalendarToolEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for GetUpcomingEventsTool {
    fn name(&self) -> &str {
        "get_upcoming_events"
    }

    fn description(&self) -> &str {
        "Get upcoming events on the user's calendar"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "hours": {
                    "type": "integer",
                    "description": "Number of hours to look ahead (default: 24)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String> {
        let hours = optional_i64(&args, "hours", DEFAULT_HORIZON_HOURS);
        if hours <= 0 {
            return Err(CalvoxError::Tool("'hours' must be positive".into()));
        }
        self.engine
            .upcoming_events(&ctx.user_id, hours, ctx.timezone)
            .await
    }
}

/// Register the full calendar tool set on a registry, in the order both
/// loop types bind them.
pub fn register_calendar_tools(
    registry: &mut super::ToolRegistry,
    engine: Arc<CalendarToolEngine>,
) {
    registry.register(Box::new(GetCurrentTimeTool));
    registry.register(Box::new(CheckAvailabilityTool::new(Arc::clone(&engine))));
    registry.register(Box::new(FindAvailableSlotsTool::new(Arc::clone(&engine))));
    registry.register(Box::new(CreateEventTool::new(Arc::clone(&engine))));
    registry.register(Box::new(GetUpcomingEventsTool::new(engine)));
}
