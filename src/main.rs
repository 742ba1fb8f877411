//! idrecon driver: reads identify requests as JSON lines on stdin and writes
//! one JSON line per request on stdout.
//!
//! Usage: `idrecon < requests.jsonl`
//! Config comes from `$IDRECON_CONFIG` or `~/.idrecon/config.json`.

use std::io::{self, BufRead, Write};

use idrecon_lib::error::ErrorType;
use idrecon_lib::state::load_config;
use idrecon_lib::{ErrorBody, IdentifyRequest, IdentityService};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load config: {e}"))?;
    let service =
        IdentityService::open(&config).map_err(|e| anyhow::anyhow!("Failed to open store: {e}"))?;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    // Lines are read as bytes: a line that is not UTF-8 is a bad request,
    // not the end of input.
    let mut line = Vec::new();
    let mut handled = 0usize;
    loop {
        line.clear();
        if input.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        handled += 1;
        let reply = match handle_line(&service, &line) {
            Ok(json) => json,
            Err(body) => serde_json::to_string(&body)?,
        };
        writeln!(out, "{reply}")?;
        out.flush()?;
    }

    log::info!(
        "Handled {handled} request(s); latency: {}",
        serde_json::to_string(&service.latency_rollups())?
    );
    Ok(())
}

fn handle_line(service: &IdentityService, line: &[u8]) -> Result<String, ErrorBody> {
    let request: IdentifyRequest = serde_json::from_slice(line).map_err(|e| {
        log::warn!("Rejecting malformed request line: {e}");
        ErrorBody {
            message: format!("Malformed request: {e}"),
            error_type: ErrorType::Client,
            status_code: 400,
        }
    })?;

    let response = service
        .identify_request(request)
        .map_err(|e| ErrorBody::from(&e))?;

    serde_json::to_string(&response).map_err(|e| ErrorBody {
        message: format!("Failed to encode response: {e}"),
        error_type: ErrorType::Server,
        status_code: 500,
    })
}
