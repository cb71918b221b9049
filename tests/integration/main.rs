//! Integration tests: full poll cycles against in-memory collaborators.

mod cycle_scenarios;
mod mock_collaborators;
