/*! Integration tests for Mergeview.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - backend: Tests for the in-memory store the merged views run on
 * - collection: Tests for declaring paths, fields and filters
 * - record: Tests for reading merged records and fields
 * - events: Tests for the synthesized set, record and field events
 * - writes: Tests for splitting merged writes across paths
 * - reference: Tests for the remaining MergedRef surface
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("mergeview=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod backend;
mod collection;
mod events;
mod helpers;
mod record;
mod reference;
mod writes;
