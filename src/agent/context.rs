//! Prompt assembly for the agent loop.
//!
//! One augmented window per invocation: a fixed system preamble carrying
//! current-date context and the tool-use rules, the bounded recent history
//! window, then the new user turn. History replays only plain
//! user/assistant text; tool turns are never persisted, so they never
//! reappear here.

use crate::error::Result;
use crate::history::{ConversationHistory, Role};
use crate::provider::ChatMessage;
use crate::timeutil::NowInfo;

/// Builds the model request window for one agent-loop invocation.
pub struct ContextBuilder {
    history_window: usize,
}

impl ContextBuilder {
    pub fn new(history_window: usize) -> Self {
        Self { history_window }
    }

    /// The fixed system preamble. The date context uses the same clock as
    /// the `get_current_time` tool, so prompt and tool can never disagree
    /// about "today".
    pub fn system_prompt(now: &NowInfo) -> String {
        format!(
            "You are a helpful calendar assistant. You have access to tools to check \
calendar availability, find free slots, create events, and view upcoming events.

CURRENT DATE AND TIME CONTEXT:
- Current date: {date} ({full})
- Current time: {time}
- Current day of week: {weekday}
- Current year: {year}
- Current month: {month}
- Current day of month: {day}

RULES FOR DATE CALCULATION:
- Calculate dates yourself from the current date context above.
- \"tomorrow\" means the current date plus one day; \"next Monday\" means the next \
occurrence of Monday after today.
- Always convert relative dates to ISO format (YYYY-MM-DD) before calling tools.

RULES FOR TOOL USAGE:
1. ONLY use tools when the user explicitly asks about calendar information, \
events, availability, or scheduling.
2. Do NOT use tools for greetings, small talk, thanks, or anything unrelated \
to the calendar; just respond conversationally.
3. Report ONLY events that tools return. Never invent, infer, or remember \
events from earlier conversation; call a tool instead.
4. Times the user says (\"2pm\", \"noon\") are their LOCAL time. Pass them to \
tools as ISO timestamps (YYYY-MM-DDTHH:MM:SS) without any offset.

RULES FOR SCHEDULING:
- create_event requires a title, a start date, a start time, and an end time \
or duration. If ANY of these is missing, ask the user before calling the tool. \
Never assume default times or durations.

RESPONSE FORMAT:
- Your responses are read aloud. Use natural spoken language: \"2:30 PM\", \
\"January 30th\", \"tomorrow\". Never include ISO timestamps, timezone \
abbreviations, or technical jargon in responses.",
            date = now.date,
            full = now.full,
            time = now.time,
            weekday = now.weekday,
            year = now.year,
            month = now.month,
            day = now.day,
        )
    }

    /// Assemble the request window: preamble, recent history, new user turn.
    pub async fn build(
        &self,
        history: &dyn ConversationHistory,
        user_id: &str,
        message: &str,
    ) -> Result<Vec<ChatMessage>> {
        let mut messages = vec![ChatMessage::system(Self::system_prompt(&NowInfo::capture()))];

        for turn in history.recent(user_id, self.history_window).await? {
            if turn.content.trim().is_empty() {
                continue;
            }
            match turn.role {
                Role::User => messages.push(ChatMessage::user(turn.content)),
                Role::Assistant => messages.push(ChatMessage::assistant(turn.content)),
                // Tool turns are never persisted; skip any that appear.
                Role::Tool => continue,
            }
        }

        messages.push(ChatMessage::user(message));
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryStore, Turn};
    use crate::provider::ChatRole;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_system_prompt_carries_date_context() {
        let now = NowInfo::at(Utc.with_ymd_and_hms(2026, 8, 6, 15, 0, 0).unwrap());
        let prompt = ContextBuilder::system_prompt(&now);
        assert!(prompt.contains("2026-08-06"));
        assert!(prompt.contains("Thursday"));
        assert!(prompt.contains("August"));
        assert!(prompt.contains("ONLY use tools"));
        assert!(prompt.contains("read aloud"));
    }

    #[tokio::test]
    async fn test_build_orders_preamble_history_message() {
        let store = HistoryStore::new_memory();
        store.append("alice", Turn::user("earlier question")).await.unwrap();
        store
            .append("alice", Turn::assistant("earlier answer"))
            .await
            .unwrap();

        let window = ContextBuilder::new(10)
            .build(&store, "alice", "new question")
            .await
            .unwrap();

        assert_eq!(window.len(), 4);
        assert_eq!(window[0].role, ChatRole::System);
        assert_eq!(window[1].content, "earlier question");
        assert_eq!(window[2].content, "earlier answer");
        assert_eq!(window[3].content, "new question");
        assert_eq!(window[3].role, ChatRole::User);
    }

    #[tokio::test]
    async fn test_build_bounds_the_history_window() {
        let store = HistoryStore::new_memory();
        for i in 0..30 {
            store
                .append("alice", Turn::user(format!("message {i}")))
                .await
                .unwrap();
        }

        let window = ContextBuilder::new(10)
            .build(&store, "alice", "latest")
            .await
            .unwrap();

        // System + 10 recent + the new message.
        assert_eq!(window.len(), 12);
        assert_eq!(window[1].content, "message 20");
    }

    #[tokio::test]
    async fn test_build_skips_empty_turns() {
        let store = HistoryStore::new_memory();
        store.append("alice", Turn::user("  ")).await.unwrap();
        store.append("alice", Turn::assistant("real answer")).await.unwrap();

        let window = ContextBuilder::new(10)
            .build(&store, "alice", "hello")
            .await
            .unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[1].content, "real answer");
    }
}
