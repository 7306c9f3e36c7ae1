// Echo handler
// Writes every received byte back to the peer

use tokio::io;
use tokio::net::TcpStream;

use super::{ConnectionHandler, ConnectionInitializer, HandlerFuture};
use crate::error::BootstrapError;
use crate::logger;
use crate::server::attributes::AttributeKey;
use crate::server::connection::ConnectionContext;

/// Installs an [`EchoHandler`] on every connection and logs the
/// connection's `client_id` attribute.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoInitializer;

impl ConnectionInitializer for EchoInitializer {
    fn initialize(
        &self,
        ctx: &mut ConnectionContext,
    ) -> Result<Box<dyn ConnectionHandler>, BootstrapError> {
        let client_id = ctx
            .attribute(&AttributeKey::ClientId)
            .map_or_else(|| "-".to_string(), ToString::to_string);
        logger::log_info(
            "echo",
            &format!(
                "{} from {} to {} initialized (client_id={client_id}) on {}",
                ctx.id(),
                ctx.remote_address(),
                ctx.local_address(),
                ctx.assigned_worker()
            ),
        );
        Ok(Box::new(EchoHandler))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl ConnectionHandler for EchoHandler {
    fn handle(self: Box<Self>, mut stream: TcpStream, _ctx: ConnectionContext) -> HandlerFuture {
        Box::pin(async move {
            let (mut reader, mut writer) = stream.split();
            io::copy(&mut reader, &mut writer).await?;
            Ok::<_, io::Error>(())
        })
    }
}
