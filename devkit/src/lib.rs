/*!
# QoE DevKit - stubs and helpers for testing the QoE agent

- Stub classifier, push backend and asset origin on an ephemeral port
- Test harness with polling helpers
*/

pub mod stub_server;
pub mod test_utils;

pub use stub_server::{StubServer, APP_ASSETS};
pub use test_utils::TestHarness;
