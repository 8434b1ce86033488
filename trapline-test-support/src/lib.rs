//! # trapline-test-support
//!
//! Testing infrastructure for trapline.
//!
//! ## Components
//!
//! - **TrapBuilder** - BER-encoded v1/v2c/v3 messages for listener tests
//! - **StressRunner** - multi-producer buffer stress with order checking
//! - **TaskHarness** - a started task on an ephemeral port plus a sender

pub mod harness;
pub mod pdu;
pub mod stress;

pub use harness::TaskHarness;
pub use pdu::{ garbage, random_trap, TrapBuilder };
pub use stress::{ print_summary, SequenceChecker, StressConfig, StressCounters, StressMetrics, StressRunner };
