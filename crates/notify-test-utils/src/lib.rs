// notify-test-utils: shared test utilities for the notification workspace.
//
// Provides a mock push server and client for integration testing of the
// notifier's connection manager.

pub mod mock_push_client;
pub mod mock_push_server;

pub use mock_push_client::MockPushClient;
pub use mock_push_server::MockPushServer;
