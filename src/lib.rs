//! Relays Devman (dvmn.org) code-review verdicts to Telegram.
//!
//! `devman` long-polls the review API (transient failures retry forever,
//! `timeout` replies renegotiate the resume timestamp), `review` turns a
//! successful poll into a user-facing verdict, `bot` routes `/start` and
//! `/check`, and `relay` mirrors debug-and-above log records to the most
//! recently active chat.

pub mod bot;
pub mod config;
pub mod devman;
pub mod error;
pub mod relay;
pub mod review;
pub mod telegram;
