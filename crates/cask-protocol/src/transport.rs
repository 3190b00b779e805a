use cask_provider::Provider;

use crate::codec::CaskCodec;
use crate::error::ProtocolResult;
use crate::message::CaskMessage;
use crate::server::CaskServer;

/// Blocking request/response transport.
///
/// One request produces exactly one response; pipelining is the caller's
/// problem. Implementations carry the framing (`CaskCodec`) so both ends
/// exchange validated messages only.
pub trait Transport {
    fn call(&mut self, request: &CaskMessage) -> ProtocolResult<CaskMessage>;
}

/// In-process transport wired directly to a [`CaskServer`].
///
/// Every call still round-trips through the codec in both directions, so a
/// loopback session exercises the same wire format as a socket would.
pub struct LoopbackTransport<P: Provider> {
    server: CaskServer<P>,
}

impl<P: Provider> LoopbackTransport<P> {
    pub fn new(provider: P) -> Self {
        Self {
            server: CaskServer::new(provider),
        }
    }

    /// The server side, for inspecting state in tests and embedded setups.
    pub fn server(&self) -> &CaskServer<P> {
        &self.server
    }
}

impl<P: Provider> Transport for LoopbackTransport<P> {
    fn call(&mut self, request: &CaskMessage) -> ProtocolResult<CaskMessage> {
        let wire = CaskCodec::encode(request)?;
        let (request, _) = CaskCodec::decode(&wire)?;
        let response = self.server.handle_message(request);
        let wire = CaskCodec::encode(&response)?;
        let (response, _) = CaskCodec::decode(&wire)?;
        Ok(response)
    }
}
