//
// main.rs
// seg2dcm
//
// Entry point that hands off execution to the CLI layer.
//

use seg2dcm::cli;

fn main() -> anyhow::Result<()> {
    cli::run()
}
