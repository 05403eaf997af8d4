//! MessageU protocol client
//!
//! Turns one logical request into a validated response payload, hiding
//! packet framing and reassembly. Holds no peer state between calls.

use thiserror::Error;

use super::connection::{Transport, TransportError, PACKET_SIZE};
use crate::protocol::{
    decode_identity, decode_public_key, decode_receipt, decode_response_header, decode_users_list,
    encode_request, CodecError, Identity, MessageReceipt, MessageType, Request, ResponseCode,
    ResponseHeader, UserEntry, PUBLIC_KEY_SIZE, RESPONSE_HEADER_SIZE,
};

/// Protocol client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Malformed data: {0}")]
    Codec(#[from] CodecError),

    #[error("Server responded with code 9000 - general error")]
    GeneralError,

    #[error("Unexpected response code {actual} received, expected {expected}")]
    UnexpectedCode { actual: u16, expected: u16 },

    #[error("Unexpected payload size {actual} for response code {code}, expected {expected}")]
    UnexpectedPayloadSize {
        code: u16,
        actual: u32,
        expected: usize,
    },
}

impl ClientError {
    /// True for failures to move bytes, as opposed to a bad or refused reply
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Check a response header against the code the request expects.
///
/// The general error code is always a failure, even when asked for.
/// Codes with a fixed payload shape must carry exactly that many bytes;
/// other codes accept any payload length.
pub fn validate_response_header(
    header: &ResponseHeader,
    expected: ResponseCode,
) -> ClientResult<()> {
    if header.code == ResponseCode::GeneralError as u16 {
        return Err(ClientError::GeneralError);
    }

    if header.code != expected as u16 {
        return Err(ClientError::UnexpectedCode {
            actual: header.code,
            expected: expected as u16,
        });
    }

    if let Some(size) = expected.fixed_payload_size() {
        if header.payload_len as usize != size {
            return Err(ClientError::UnexpectedPayloadSize {
                code: header.code,
                actual: header.payload_len,
                expected: size,
            });
        }
    }

    Ok(())
}

/// Client for the MessageU server
pub struct ProtocolClient {
    transport: Transport,
}

impl ProtocolClient {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Send `request` and read a response whose payload size is only known
    /// once its header arrives. The connection is closed on every path.
    pub async fn receive_unknown_payload(
        &mut self,
        request: &[u8],
        expected: ResponseCode,
    ) -> ClientResult<Vec<u8>> {
        if request.is_empty() {
            return Err(TransportError::EmptyRequest.into());
        }

        self.transport.connect().await?;
        let result = self.read_unknown_payload(request, expected).await;
        self.transport.close().await;
        result
    }

    async fn read_unknown_payload(
        &mut self,
        request: &[u8],
        expected: ResponseCode,
    ) -> ClientResult<Vec<u8>> {
        self.transport.send(request).await?;

        let mut packet = [0u8; PACKET_SIZE];
        let received = self.transport.receive_packet(&mut packet).await?;
        if received < RESPONSE_HEADER_SIZE {
            return Err(TransportError::EarlyClose {
                received,
                expected: RESPONSE_HEADER_SIZE,
            }
            .into());
        }
        let header = decode_response_header(&packet[..received])?;
        validate_response_header(&header, expected)?;

        let size = header.payload_len as usize;
        if size == 0 {
            return Ok(Vec::new());
        }

        let mut payload = vec![0u8; size];
        let mut filled = (received - RESPONSE_HEADER_SIZE).min(size);
        payload[..filled].copy_from_slice(&packet[RESPONSE_HEADER_SIZE..RESPONSE_HEADER_SIZE + filled]);

        while filled < size {
            let to_read = (size - filled).min(PACKET_SIZE);
            self.transport
                .receive(&mut payload[filled..filled + to_read])
                .await?;
            filled += to_read;
        }

        tracing::debug!("Received {} byte payload for code {}", size, header.code);
        Ok(payload)
    }

    /// Exchange for responses whose payload size is fixed by their code
    async fn exchange_fixed(
        &mut self,
        request: &[u8],
        expected: ResponseCode,
    ) -> ClientResult<Vec<u8>> {
        let payload_size = expected.fixed_payload_size().unwrap_or(0);
        let response = self
            .transport
            .send_receive(request, RESPONSE_HEADER_SIZE + payload_size)
            .await?;

        let header = decode_response_header(&response)?;
        validate_response_header(&header, expected)?;
        Ok(response[RESPONSE_HEADER_SIZE..].to_vec())
    }

    /// Register `name`; returns the identity the server assigned
    pub async fn register(
        &mut self,
        name: &str,
        public_key: &[u8; PUBLIC_KEY_SIZE],
    ) -> ClientResult<Identity> {
        let request = Request::Register {
            name: name.to_string(),
            public_key: *public_key,
        };
        let frame = encode_request(&Identity::UNASSIGNED, &request)?;
        let payload = self
            .exchange_fixed(&frame, request.expected_response())
            .await?;

        let id = decode_identity(&payload)?;
        tracing::info!("Registered '{}' as {}", name, id);
        Ok(id)
    }

    /// Fetch every registered user other than `sender`, in server order
    pub async fn users_list(&mut self, sender: &Identity) -> ClientResult<Vec<UserEntry>> {
        let request = Request::UsersList;
        let frame = encode_request(sender, &request)?;
        let payload = self
            .receive_unknown_payload(&frame, request.expected_response())
            .await?;

        let users = decode_users_list(&payload)?;
        tracing::debug!("Users list holds {} entries", users.len());
        Ok(users)
    }

    /// Fetch the public key of `target`
    pub async fn public_key(
        &mut self,
        sender: &Identity,
        target: &Identity,
    ) -> ClientResult<(Identity, [u8; PUBLIC_KEY_SIZE])> {
        let request = Request::PublicKey { target: *target };
        let frame = encode_request(sender, &request)?;
        let payload = self
            .receive_unknown_payload(&frame, request.expected_response())
            .await?;

        Ok(decode_public_key(&payload)?)
    }

    /// Leave already-encrypted `content` for `target`
    pub async fn send_message(
        &mut self,
        sender: &Identity,
        target: &Identity,
        kind: MessageType,
        content: Vec<u8>,
    ) -> ClientResult<MessageReceipt> {
        let request = Request::SendMessage {
            target: *target,
            kind,
            content,
        };
        let frame = encode_request(sender, &request)?;
        let payload = self
            .exchange_fixed(&frame, request.expected_response())
            .await?;

        let receipt = decode_receipt(&payload)?;
        tracing::debug!("Message {} accepted for {}", receipt.message_id, receipt.target);
        Ok(receipt)
    }

    /// Fetch the raw pending-messages payload for `sender`
    pub async fn pull_pending(&mut self, sender: &Identity) -> ClientResult<Vec<u8>> {
        let request = Request::PullPending;
        let frame = encode_request(sender, &request)?;
        self.receive_unknown_payload(&frame, request.expected_response())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::test_server;
    use crate::network::ServerAddress;
    use crate::protocol::test_support::{response, users_payload};
    use crate::protocol::{decode_request_header, IDENTITY_SIZE, REQUEST_HEADER_SIZE};

    fn header(code: u16, payload_len: u32) -> ResponseHeader {
        ResponseHeader {
            version: 2,
            code,
            payload_len,
        }
    }

    fn client_for(address: ServerAddress) -> ProtocolClient {
        ProtocolClient::new(Transport::with_address(address))
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[test]
    fn test_general_error_never_accepted() {
        for expected in [
            ResponseCode::Registered,
            ResponseCode::UsersList,
            ResponseCode::GeneralError,
        ] {
            assert!(matches!(
                validate_response_header(&header(9000, 0), expected),
                Err(ClientError::GeneralError)
            ));
        }
    }

    #[test]
    fn test_unexpected_code_names_both() {
        let err = validate_response_header(&header(2101, 0), ResponseCode::PendingMessages)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("2101"));
        assert!(message.contains("2104"));
    }

    #[test]
    fn test_fixed_size_enforced() {
        assert!(validate_response_header(&header(2100, 16), ResponseCode::Registered).is_ok());
        assert!(matches!(
            validate_response_header(&header(2100, 17), ResponseCode::Registered),
            Err(ClientError::UnexpectedPayloadSize { expected: 16, .. })
        ));
        assert!(matches!(
            validate_response_header(&header(2102, 160), ResponseCode::PublicKey),
            Err(ClientError::UnexpectedPayloadSize { expected: 176, .. })
        ));
        assert!(matches!(
            validate_response_header(&header(2103, 0), ResponseCode::MessageSent),
            Err(ClientError::UnexpectedPayloadSize { expected: 20, .. })
        ));
    }

    #[test]
    fn test_variable_size_accepted() {
        for len in [0, 1, 271, 100_000] {
            assert!(validate_response_header(&header(2101, len), ResponseCode::UsersList).is_ok());
            assert!(
                validate_response_header(&header(2104, len), ResponseCode::PendingMessages).is_ok()
            );
        }
    }

    #[tokio::test]
    async fn test_reassembles_multi_packet_payloads() {
        // 1, 1, 2, 2 and 5 packets once the 7-byte header is counted.
        for size in [500usize, 1017, 1024, 2000, 4500] {
            for unpadded in [false, true] {
                let payload = pattern(size);
                let canned = vec![response(2104, &payload)];
                let (address, server) = if unpadded {
                    test_server::spawn_unpadded(canned).await
                } else {
                    test_server::spawn(canned).await
                };

                let mut client = client_for(address);
                let frame = encode_request(&Identity::UNASSIGNED, &Request::PullPending).unwrap();
                let received = client
                    .receive_unknown_payload(&frame, ResponseCode::PendingMessages)
                    .await
                    .unwrap();

                assert_eq!(received.len(), size);
                assert_eq!(received, payload, "size {} unpadded {}", size, unpadded);
                assert!(!client.transport().is_connected());
                server.await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let (address, server) = test_server::spawn(vec![response(2104, &[])]).await;
        let mut client = client_for(address);

        let payload = client.pull_pending(&Identity::UNASSIGNED).await.unwrap();
        assert!(payload.is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_general_error_response() {
        let (address, server) = test_server::spawn(vec![response(9000, &[])]).await;
        let mut client = client_for(address);

        let err = client.users_list(&Identity::UNASSIGNED).await.unwrap_err();
        assert!(matches!(err, ClientError::GeneralError));
        assert!(!err.is_transport());
        assert!(!client.transport().is_connected());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_truncated_payload_is_transport_fault() {
        // Header promises 3000 bytes, server hangs up after 100.
        let mut bytes = response(2104, &pattern(100));
        bytes[3..7].copy_from_slice(&3000u32.to_le_bytes());
        let (address, server) = test_server::spawn_unpadded(vec![bytes]).await;
        let mut client = client_for(address);

        let err = client.pull_pending(&Identity::UNASSIGNED).await.unwrap_err();
        assert!(err.is_transport());
        assert!(!client.transport().is_connected());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_inside_header_is_transport_fault() {
        let (address, server) = test_server::spawn_unpadded(vec![vec![2, 0x35]]).await;
        let mut client = client_for(address);

        let err = client.pull_pending(&Identity::UNASSIGNED).await.unwrap_err();
        assert!(err.is_transport());
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::EarlyClose {
                received: 2,
                expected: RESPONSE_HEADER_SIZE
            })
        ));
        assert!(!client.transport().is_connected());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_register() {
        let id = [0x11u8; IDENTITY_SIZE];
        let (address, server) = test_server::spawn(vec![response(2100, &id)]).await;
        let mut client = client_for(address);

        let assigned = client.register("alice", &[0x22; PUBLIC_KEY_SIZE]).await.unwrap();
        assert_eq!(assigned, Identity::from_bytes(id));

        let requests = server.await.unwrap();
        let request = decode_request_header(&requests[0]).unwrap();
        assert_eq!(request.code, 600);
        assert_eq!(request.payload_len, 415);
        assert_eq!(&requests[0][REQUEST_HEADER_SIZE..REQUEST_HEADER_SIZE + 5], b"alice");
    }

    #[tokio::test]
    async fn test_register_wrong_size_rejected() {
        let (address, server) = test_server::spawn(vec![response(2100, &[1u8; 15])]).await;
        let mut client = client_for(address);

        let err = client.register("alice", &[0; PUBLIC_KEY_SIZE]).await.unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedPayloadSize { .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_users_list() {
        let payload = users_payload(&[(1, "alice"), (2, "bob"), (3, "carol")]);
        let (address, server) = test_server::spawn(vec![response(2101, &payload)]).await;
        let mut client = client_for(address);

        let users = client
            .users_list(&Identity::from_bytes([9; IDENTITY_SIZE]))
            .await
            .unwrap();
        let names: Vec<&str> = users.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["alice", "bob", "carol"]);

        let requests = server.await.unwrap();
        assert_eq!(&requests[0][..IDENTITY_SIZE], &[9; IDENTITY_SIZE]);
    }

    #[tokio::test]
    async fn test_users_list_ragged_payload() {
        let mut payload = users_payload(&[(1, "alice")]);
        payload.extend_from_slice(&[0; 10]);
        let (address, server) = test_server::spawn(vec![response(2101, &payload)]).await;
        let mut client = client_for(address);

        let err = client.users_list(&Identity::UNASSIGNED).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Codec(CodecError::RaggedUsersList { .. })
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_public_key() {
        let mut payload = vec![4u8; IDENTITY_SIZE];
        payload.extend_from_slice(&[0x33; PUBLIC_KEY_SIZE]);
        let (address, server) = test_server::spawn(vec![response(2102, &payload)]).await;
        let mut client = client_for(address);

        let target = Identity::from_bytes([4; IDENTITY_SIZE]);
        let (id, key) = client
            .public_key(&Identity::UNASSIGNED, &target)
            .await
            .unwrap();
        assert_eq!(id, target);
        assert_eq!(key, [0x33; PUBLIC_KEY_SIZE]);

        let requests = server.await.unwrap();
        assert_eq!(&requests[0][REQUEST_HEADER_SIZE..], target.as_bytes());
    }

    #[tokio::test]
    async fn test_send_message_receipt() {
        let mut payload = vec![5u8; IDENTITY_SIZE];
        payload.extend_from_slice(&31u32.to_le_bytes());
        let (address, server) = test_server::spawn(vec![response(2103, &payload)]).await;
        let mut client = client_for(address);

        let target = Identity::from_bytes([5; IDENTITY_SIZE]);
        let receipt = client
            .send_message(&Identity::UNASSIGNED, &target, MessageType::Text, vec![1; 32])
            .await
            .unwrap();
        assert_eq!(receipt.target, target);
        assert_eq!(receipt.message_id, 31);

        let requests = server.await.unwrap();
        let request = decode_request_header(&requests[0]).unwrap();
        assert_eq!(request.code, 603);
        assert_eq!(request.payload_len as usize, 21 + 32);
    }

    #[tokio::test]
    async fn test_empty_request_rejected_without_connecting() {
        let mut client = ProtocolClient::new(Transport::new());
        let err = client
            .receive_unknown_payload(&[], ResponseCode::UsersList)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Transport(TransportError::EmptyRequest)
        ));
    }
}
