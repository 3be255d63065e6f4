//! The `futility` multi-call entrypoint. Usually invoked via a symlink
//! named after the tool being run.

fn main() {
    futility_utils::initialize_tracing();
    tracing::trace!("starting");
    std::process::exit(futility_lib::cli::run_from_env());
}
