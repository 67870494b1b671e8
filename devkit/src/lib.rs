/*!
# FleetSim DevKit - Stubs and helpers for engine tests

- Scripted narrative provider (reply, failure, hang) recording its prompts
- Builders for server snapshots and scenario windows
- Harness driving a seeded fleet and an incident detector on a fake clock
*/

pub mod fixtures;
pub mod narrative_stub;
pub mod test_utils;

pub use fixtures::{ScenarioBuilder, ServerStateBuilder};
pub use narrative_stub::{StubBehavior, StubNarrativeProvider};
pub use test_utils::TestHarness;
