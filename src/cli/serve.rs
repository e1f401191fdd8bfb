use crate::config::Config;
use crate::error::Result;
use crate::mcp::{McpServer, ServerIo};
use crate::memory::Memories;
use std::io;
use std::path::Path;
use tracing::Dispatch;

/// Run the JSON-RPC server over stdin/stdout until stdin closes
pub fn run_serve(data_dir: &Path, log: Dispatch) -> Result<()> {
    let config = Config::load(data_dir)?;
    let memories = Memories::open(data_dir, &config)?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let server = McpServer::new(
        memories,
        ServerIo {
            input: stdin.lock(),
            output: stdout.lock(),
            log,
        },
    );
    server.run()
}
