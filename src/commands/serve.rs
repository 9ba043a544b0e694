use nodeplane::http_server::HttpServer;

use super::{print_step, Node};

pub(crate) async fn cmd_serve(
    node: Node,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let mut server = node.config.server.clone();
    if let Some(host) = host {
        server.host = host;
    }
    if let Some(port) = port {
        server.port = port;
    }

    print_step(format!("Serving on http://{}:{}", server.host, server.port));
    if node.reports.is_none() {
        tracing::info!("No reports database configured; report routes answer 503");
    }

    HttpServer::new(server, node.state()).run().await
}
