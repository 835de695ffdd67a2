//! `pairbench` binary entry point.

fn main() {
    std::process::exit(pairbench_cli::run());
}
