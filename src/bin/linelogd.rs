//! linelogd - single-instance TCP line logging daemon
//!
//! Accepts up to `max_clients` TCP connections, appends every line it
//! receives to a timestamped log file and stops on `quit` or a termination
//! signal. See `linelogd --help`.

fn main() -> anyhow::Result<()> {
    linelogd::cli::run()
}
