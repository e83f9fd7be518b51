#![allow(dead_code)]

pub use caseflow_test_utils::builders::{CaseModelBuilder, ItemBuilder, SentryBuilder};
pub use caseflow_test_utils::{TestEngine, init_tracing, vars, with_timeout};
