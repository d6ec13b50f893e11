use async_trait::async_trait;

use crate::device::TvConfiguration;
use crate::webos::ClientError;
use crate::webos::PayloadFields;
use crate::webos::TvClient;
use crate::webos::TvCommand;
use crate::webos::TvSnapshot;

/// What the orchestrator needs from the protocol client.
///
/// This trait allows the orchestrator to be driven by a mock TV in tests.
#[async_trait]
pub trait TvControl: Send + Sync {
    async fn connect(&self, config: &TvConfiguration) -> Result<(), ClientError>;

    fn disconnect(&self);

    fn send_command(&self, command: TvCommand) -> Result<(), ClientError>;

    async fn request(&self, command: TvCommand) -> Result<PayloadFields, ClientError>;

    fn snapshot(&self) -> TvSnapshot;
}

#[async_trait]
impl TvControl for TvClient {
    async fn connect(&self, config: &TvConfiguration) -> Result<(), ClientError> {
        TvClient::connect(self, config).await
    }

    fn disconnect(&self) {
        TvClient::disconnect(self)
    }

    fn send_command(&self, command: TvCommand) -> Result<(), ClientError> {
        TvClient::send_command(self, command)
    }

    async fn request(&self, command: TvCommand) -> Result<PayloadFields, ClientError> {
        TvClient::request(self, command).await
    }

    fn snapshot(&self) -> TvSnapshot {
        TvClient::snapshot(self)
    }
}
