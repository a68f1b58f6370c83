//! Maintenance tasks spawned by `main` alongside the server, each stopped
//! through a `CancellationToken`.

pub mod job_retention;
