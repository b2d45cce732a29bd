use super::test_helpers::*;
use super::*;
use crate::error::{FetchError, SessionError};
use crate::session::{Message, MessageReply};
use crate::types::{ContentRequest, ContentState, Severity};
use std::time::Duration;
