//! Command Catalogue
//!
//! Static mapping from gestures to actions, prompt templates, status messages,
//! and the cached artifacts used when the backend cannot be reached.

use crate::classifier::Gesture;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Placeholder replaced by the caller-supplied context in every template.
pub const CONTEXT_PLACEHOLDER: &str = "{code}";

/// Action that cancels the live session without starting a new one.
pub const STOP_ACTION: &str = "stop";

pub const STOP_STATUS: &str = "⏹ Stream aborted.";
pub const SUCCESS_STATUS: &str = "✓ Copied to clipboard";
pub const FALLBACK_STATUS: &str = "⚠ Offline: using cached result";

/// Demo code used as context when the clipboard is unavailable or empty.
pub const FALLBACK_CONTEXT: &str = r#"class UserService:
    def __init__(self, db):
        self.db = db
        self.cache = {}

    def get_user(self, user_id):
        if user_id in self.cache:
            return self.cache[user_id]
        user = self.db.query("SELECT * FROM users WHERE id = " + user_id)
        self.cache[user_id] = user
        return user

    def delete_user(self, user_id):
        self.db.query("DELETE FROM users WHERE id = " + user_id)

    def get_active_users(self):
        users = self.db.query("SELECT * FROM users WHERE active = 1")
        return sorted(users, key=lambda u: u['last_login'])"#;

const FIX_FALLBACK: &str = r#"class UserService:
    def __init__(self, db):
        self.db = db
        self.cache = {}

    def get_user(self, user_id):
        if user_id in self.cache:
            return self.cache[user_id]
        # fix: use parameterized query to prevent SQL injection
        user = self.db.query("SELECT * FROM users WHERE id = %s", (user_id,))
        self.cache[user_id] = user
        return user

    def delete_user(self, user_id):
        # fix: use parameterized query + invalidate cache
        self.db.query("DELETE FROM users WHERE id = %s", (user_id,))
        self.cache.pop(user_id, None)

    def get_active_users(self):
        users = self.db.query("SELECT * FROM users WHERE active = 1")
        # fix: handle empty result + reverse sort for most recent first
        if not users:
            return []
        return sorted(users, key=lambda u: u['last_login'], reverse=True)"#;

const EXPLAIN_FALLBACK: &str = "\
• A simple ORM-style service that queries users from a database with an in-memory cache layer for repeated lookups by ID.
• Contains SQL injection vulnerabilities: user_id is concatenated directly into query strings instead of using parameterized queries.
• The delete method doesn't invalidate the cache, so get_user() will return stale data for deleted users. get_active_users() sorts by last_login ascending (oldest first) which is likely backwards.";

const COMMIT_FALLBACK: &str = "\
fix: patch SQL injection and cache invalidation in UserService

- Replace string concatenation with parameterized queries in get_user and delete_user
- Invalidate cache entry on delete to prevent stale reads
- Guard against empty result in get_active_users, sort most-recent-first";

const TEST_FALLBACK: &str = r#"import pytest
from unittest.mock import MagicMock
from user_service import UserService

@pytest.fixture
def service():
    db = MagicMock()
    return UserService(db)

def test_get_user_queries_db(service):
    service.db.query.return_value = {"id": "1", "name": "Alice"}
    assert service.get_user("1")["name"] == "Alice"

def test_get_user_uses_cache(service):
    service.db.query.return_value = {"id": "1", "name": "Alice"}
    service.get_user("1")
    service.get_user("1")
    assert service.db.query.call_count == 1

def test_delete_user_invalidates_cache(service):
    service.cache["1"] = {"id": "1", "name": "Alice"}
    service.delete_user("1")
    assert "1" not in service.cache

def test_get_active_users_empty(service):
    service.db.query.return_value = []
    assert service.get_active_users() == []

def test_get_active_users_sorted_recent_first(service):
    service.db.query.return_value = [
        {"last_login": "2024-01-01"}, {"last_login": "2024-06-01"}
    ]
    result = service.get_active_users()
    assert result[0]["last_login"] == "2024-06-01""#;

/// One registered command. Immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub gesture: Gesture,
    pub action: String,
    pub prompt_template: String,
    pub status_message: String,
    pub fallback_artifact: String,
}

impl Command {
    /// Substitutes the context into the template. The placeholder appears at
    /// most once and the context is opaque text, so nothing is escaped.
    pub fn render_prompt(&self, context: &str) -> String {
        self.prompt_template.replacen(CONTEXT_PLACEHOLDER, context, 1)
    }
}

/// What a confirmed gesture asks the dispatcher to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureAction<'a> {
    Run(&'a Command),
    Stop,
}

impl GestureAction<'_> {
    pub fn action_name(&self) -> &str {
        match self {
            GestureAction::Run(cmd) => &cmd.action,
            GestureAction::Stop => STOP_ACTION,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandCatalog {
    commands: Vec<Command>,
    stop_gesture: Gesture,
}

impl Default for CommandCatalog {
    fn default() -> Self {
        let command = |gesture, action: &str, template: &str, status: &str, fallback: &str| Command {
            gesture,
            action: action.to_string(),
            prompt_template: template.to_string(),
            status_message: status.to_string(),
            fallback_artifact: fallback.to_string(),
        };

        Self {
            commands: vec![
                command(
                    Gesture::ThumbsDown,
                    "fix",
                    "Here is a function with a bug. Identify and fix it. Return only the corrected code with a one-line comment explaining the fix:\n\n{code}",
                    "▶ Fixing bug in selected code...",
                    FIX_FALLBACK,
                ),
                command(
                    Gesture::PointUp,
                    "explain",
                    "Explain what this code does in 3 bullet points, written for a developer:\n\n{code}",
                    "▶ Explaining selected code...",
                    EXPLAIN_FALLBACK,
                ),
                command(
                    Gesture::Fist,
                    "commit",
                    "Write a concise, conventional git commit message for the following change:\n\n{code}",
                    "▶ Generating commit message...",
                    COMMIT_FALLBACK,
                ),
                command(
                    Gesture::Peace,
                    "test",
                    "Generate a complete pytest test file for this function. Include happy path, edge cases, and error cases:\n\n{code}",
                    "▶ Scaffolding test file...",
                    TEST_FALLBACK,
                ),
            ],
            stop_gesture: Gesture::OpenPalm,
        }
    }
}

impl CommandCatalog {
    pub fn get(&self, action: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.action == action)
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Resolves a confirmed gesture. Gestures without a binding return `None`.
    pub fn for_gesture(&self, gesture: Gesture) -> Option<GestureAction<'_>> {
        if gesture == self.stop_gesture {
            return Some(GestureAction::Stop);
        }
        self.commands
            .iter()
            .find(|c| c.gesture == gesture)
            .map(GestureAction::Run)
    }

    /// Replaces prompt templates with `<action>.md` files found in `dir`.
    /// Files for unknown actions are ignored.
    pub fn with_prompt_overrides(mut self, dir: &Path) -> Result<Self> {
        let overrides = load_prompts(dir)?;
        for cmd in &mut self.commands {
            if let Some(template) = overrides.get(&cmd.action) {
                info!(action = %cmd.action, "Using prompt template override");
                cmd.prompt_template = template.trim_end().to_string();
            }
        }
        Ok(self)
    }
}

/// Reads every `*.md` file in a directory, keyed by file stem.
fn load_prompts(dir: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read prompts directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = std::fs::read_to_string(&path)?;
            prompts.insert(key, content);
        }
    }
    Ok(prompts)
}
