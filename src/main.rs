use std::process::ExitCode;

use anyhow::Context;

use draft_guard::config::PipelineConfig;
use draft_guard::error::Error;
use draft_guard::llm::{LlmConfig, create_provider};
use draft_guard::message::load_thread;
use draft_guard::pipeline::DraftPipeline;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("Usage: draft-guard <thread.json | message.eml...>");
        eprintln!("  export DRAFT_SELF_IDENTITY=\"Your Name <you@example.com>\"");
        return Ok(ExitCode::from(2));
    }

    let self_identity = std::env::var("DRAFT_SELF_IDENTITY").unwrap_or_else(|_| {
        eprintln!("Error: DRAFT_SELF_IDENTITY not set");
        eprintln!("  export DRAFT_SELF_IDENTITY=you@example.com");
        std::process::exit(2);
    });

    let config = PipelineConfig::from_env();
    config.validate()?;
    let llm_config = LlmConfig::from_env()?;

    eprintln!("✉️  draft-guard v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", llm_config.model);
    eprintln!(
        "   Attempts: {} x {:?}",
        config.invoker.max_attempts, config.invoker.attempt_timeout
    );

    let thread = load_thread(&paths).context("failed to load thread")?;
    let llm = create_provider(&llm_config)?;
    let pipeline = DraftPipeline::new(llm, config);

    match pipeline.process(&thread, &self_identity).await {
        Ok(draft) => {
            eprintln!(
                "   Role: {} | already replied: {} | redacted: {}",
                draft.role.label(),
                draft.already_replied,
                draft.redactions.total()
            );
            for warning in &draft.warnings {
                eprintln!("   Warning: {warning}");
            }
            println!("{}", draft.text);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Error [{}]: {e}", e.label());
            if let Error::Validation(failure) = &e {
                eprintln!("--- rejected draft ---");
                eprintln!("{}", failure.draft);
            }
            Ok(ExitCode::from(exit_code(&e)))
        }
    }
}

fn exit_code(error: &Error) -> u8 {
    match error {
        Error::Input(_) | Error::Config(_) => 2,
        Error::Security(_) => 3,
        Error::Invocation(_) => 4,
        Error::Validation(_) => 5,
    }
}
