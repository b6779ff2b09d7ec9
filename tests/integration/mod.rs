//! Integration tests for the sitegraph build core

mod config_integration;
mod end_to_end;
mod invalidation;
mod node_store;
mod query_scheduler;
mod result_writer;
mod schema_cache;
mod site_build;
mod test_utils;
mod worker_rpc;
