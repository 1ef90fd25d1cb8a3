//! Workspace root crate. Carries no functionality of its own — `agent`,
//! `server`, and the `flotilla-*` crates implement the fleet-management
//! core — and exists to host the cross-service integration suites under
//! `tests/integration/`, which exercise `agent` and `server` together
//! over a real socket instead of one side's mocks.
