// Copyright (c) quilldb.io 2025
// This file is licensed under the AGPL-3.0-or-later

/// Installs a fmt subscriber so `QUILLDB_LOG=trace cargo test` shows the
/// store's tracing output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("QUILLDB_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
