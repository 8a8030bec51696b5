//! JIRA Attachment Server - expiring download links for JIRA attachments via MCP
//!
//! Runs the MCP server on STDIO and the file download endpoint on HTTP.

use jira_attachment_server::{file_server, AttachmentMcpServer};
use pulseengine_mcp_server::McpServerBuilder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configure logging for STDIO transport
    AttachmentMcpServer::configure_stdio_logging();

    info!("Starting JIRA Attachment Server...");

    let attachment_server = match AttachmentMcpServer::new().await {
        Ok(server) => {
            info!("JIRA Attachment Server created successfully");
            server
        }
        Err(e) => {
            error!("Failed to create JIRA Attachment Server: {}", e);
            eprintln!("❌ Failed to start JIRA Attachment Server: {}", e);
            eprintln!("\nPlease check:");
            eprintln!("  - JIRA_URL environment variable is set");
            eprintln!("  - JIRA authentication is configured (JIRA_AUTH_TYPE, JIRA_TOKEN, etc.)");
            eprintln!("  - JIRA instance is accessible");
            eprintln!("  - ATTACHMENTS_DIR is writable");
            eprintln!("\nFor help, see the README.md file.");
            std::process::exit(1);
        }
    };

    let bind_address = attachment_server.config().files.bind_address();
    let listener = match TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind file server to {}: {}", bind_address, e);
            eprintln!("❌ Failed to bind file server to {}: {}", bind_address, e);
            eprintln!("\nSet SERVER_HOST / SERVER_PORT to a free address.");
            std::process::exit(1);
        }
    };

    let (http_shutdown, http_shutdown_rx) = oneshot::channel::<()>();
    let http_server = tokio::spawn(file_server::serve(
        listener,
        attachment_server.file_server_state(),
        async {
            let _ = http_shutdown_rx.await;
        },
    ));

    info!(
        "Download links will use {}",
        attachment_server.config().files.public_base_url()
    );

    let cleanup = Arc::clone(attachment_server.cleanup_manager());

    info!("Starting MCP server with STDIO transport...");

    // Start the server using the macro-generated infrastructure
    let mut server = attachment_server.serve_stdio().await?;

    info!("🚀 JIRA Attachment Server is running and ready to serve requests");

    server.run().await?;

    info!("MCP transport closed, shutting down");
    cleanup.shutdown().await;

    let _ = http_shutdown.send(());
    match http_server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("File server stopped with error: {}", e),
        Err(e) => warn!("File server task failed: {}", e),
    }

    Ok(())
}
