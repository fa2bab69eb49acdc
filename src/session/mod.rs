//! Session data model and client-held conversation state.
//!
//! Sessions and their messages are durable (see [`crate::store`]). The
//! conversation window that feeds the next prompt is not: it travels with the
//! client inside a [`SessionToken`] and is passed explicitly into and out of
//! every relay operation.
//!
//! # Architecture
//!
//! - [`Session`] / [`Message`]: persisted records
//! - [`ConversationWindow`]: bounded, role-tagged prompt lines
//! - [`SessionToken`]: the cookie payload (session reference + window)
//!
//! # Example
//!
//! ```rust
//! use therabot::session::{ConversationWindow, SessionToken};
//!
//! let mut token = SessionToken::default();
//! token.window.push_user("Hello!");
//! assert_eq!(token.window.lines(), ["[USER]: Hello!"]);
//!
//! let decoded = SessionToken::decode(&token.encode()).unwrap();
//! assert_eq!(decoded, token);
//! ```

mod model;
mod token;
mod window;

pub use model::{Message, Session, Speaker};
pub use token::SessionToken;
pub use window::{
    ConversationWindow, DEFAULT_INSTRUCTION, DEFAULT_MAX_LINE_BYTES, DEFAULT_WINDOW_SIZE,
    PromptSettings,
};
