//! Message interpreter: decides whether an inbound message is a render request.
//!
//! Rules, in priority order:
//! 1. Explicit prefix (`/tex`, `/tex@bot`, `/report`, `/report@bot`, `@bot`):
//!    the prefix is stripped and the remainder is the body.
//! 2. Explicit prefix with a blank body on a reply: the parent's text is
//!    interpreted instead, always accepted (one level only).
//! 3. No prefix: accepted in direct chats, or anywhere the text contains a
//!    backslash or dollar sign.
//!
//! Blank bodies with nothing to fall back on are dropped silently.

use std::collections::HashSet;

use crate::channels::InboundMessage;
use crate::worker::RenderJob;

/// How many reply parents may be followed. Only the immediate parent.
const MAX_REPLY_DEPTH: usize = 1;

/// A recognised command prefix.
#[derive(Debug, Clone)]
struct Prefix {
    text: String,
    wants_report: bool,
}

/// Body and flags extracted from a message.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Request {
    body: String,
    wants_report: bool,
}

/// Turns inbound messages into render jobs.
#[derive(Debug, Clone)]
pub struct Interpreter {
    whitelist: HashSet<i64>,
    /// Longest first, so `/tex@bot` is tried before `/tex`.
    prefixes: Vec<Prefix>,
}

impl Interpreter {
    /// `handle` is the bot's username without the leading `@`.
    pub fn new(handle: &str, whitelist: HashSet<i64>) -> Self {
        let prefixes = vec![
            Prefix {
                text: format!("/tex@{handle}"),
                wants_report: false,
            },
            Prefix {
                text: "/tex".to_string(),
                wants_report: false,
            },
            Prefix {
                text: format!("/report@{handle}"),
                wants_report: true,
            },
            Prefix {
                text: "/report".to_string(),
                wants_report: true,
            },
            Prefix {
                text: format!("@{handle}"),
                wants_report: false,
            },
        ];
        Self {
            whitelist,
            prefixes,
        }
    }

    /// Check if a sender id is whitelisted.
    fn is_sender_allowed(&self, sender_id: i64) -> bool {
        self.whitelist.contains(&sender_id)
    }

    /// Produce at most one job for `msg`.
    pub fn interpret(&self, msg: &InboundMessage) -> Option<RenderJob> {
        if !self.is_sender_allowed(msg.sender_id) {
            tracing::debug!(
                sender_id = msg.sender_id,
                chat_id = msg.chat_id,
                "Ignoring message from non-whitelisted sender"
            );
            return None;
        }

        let text = msg.text.as_deref()?;
        let request = self.resolve(
            text,
            msg.is_direct,
            msg.reply_to.as_deref(),
            false,
            0,
        )?;

        Some(RenderJob::new(
            request.body,
            msg.chat_id,
            msg.message_id,
            request.wants_report,
        ))
    }

    fn resolve(
        &self,
        text: &str,
        is_direct: bool,
        reply_to: Option<&InboundMessage>,
        force: bool,
        depth: usize,
    ) -> Option<Request> {
        let Some((prefix, body)) = self.strip_prefix(text) else {
            if text.trim().is_empty() {
                return None;
            }
            if force || is_direct || looks_like_markup(text) {
                return Some(Request {
                    body: text.to_string(),
                    wants_report: false,
                });
            }
            return None;
        };

        if !body.trim().is_empty() {
            return Some(Request {
                body: body.to_string(),
                wants_report: prefix.wants_report,
            });
        }

        if depth >= MAX_REPLY_DEPTH {
            return None;
        }
        let parent = reply_to?;
        let parent_text = parent.text.as_deref().filter(|t| !t.trim().is_empty())?;
        let parent_request = self.resolve(
            parent_text,
            parent.is_direct,
            parent.reply_to.as_deref(),
            true,
            depth + 1,
        )?;

        Some(Request {
            body: parent_request.body,
            wants_report: prefix.wants_report || parent_request.wants_report,
        })
    }

    /// Match a command prefix at a word boundary. Returns the prefix and the
    /// body with exactly one separating whitespace character removed.
    fn strip_prefix<'a>(&self, text: &'a str) -> Option<(&Prefix, &'a str)> {
        self.prefixes.iter().find_map(|prefix| {
            let rest = text.strip_prefix(prefix.text.as_str())?;
            let mut chars = rest.chars();
            match chars.next() {
                None => Some((prefix, rest)),
                Some(c) if c.is_whitespace() => Some((prefix, chars.as_str())),
                Some(_) => None,
            }
        })
    }
}

/// Cheap signal that text is probably LaTeX.
pub fn looks_like_markup(text: &str) -> bool {
    text.contains('\\') || text.contains('$')
}
