use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::pin::Pin;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use url::Url;

use crate::{Error, ErrorKind, Result};

pub const KERBEROS_PORT: u16 = 88;

// 48 000 bytes: default maximum token len in Windows
const MAX_UDP_REPLY_SIZE: usize = 0xbb80;

// 1 MiB, far above any KDC reply
const MAX_TCP_REPLY_SIZE: u32 = 0x10_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkProtocol {
    Tcp,
    Udp,
    Http,
    Https,
}

impl NetworkProtocol {
    pub fn from_url_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "tcp" => Some(Self::Tcp),
            "udp" => Some(Self::Udp),
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    pub protocol: NetworkProtocol,
    pub url: Url,
    pub data: Vec<u8>,
}

/// Represents an abstract asynchronous network client.
pub trait AsyncNetworkClient: Send + Sync {
    /// Send request to the server and return the response.
    ///
    /// URL scheme is guaranteed to be the same as specified by `protocol` field.
    /// TCP and UDP replies are returned with the 4-byte big-endian length prefix, the way a
    /// KDC answers over TCP.
    fn send<'a>(
        &'a self,
        network_request: &'a NetworkRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;
}

/// Tokio TCP/UDP sockets plus reqwest for KDC proxies.
///
/// Connecting, and waiting for a UDP datagram, give up after the configured timeout.
#[derive(Debug, Clone)]
pub struct TokioNetworkClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl TokioNetworkClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::new(
                    ErrorKind::InternalError,
                    format!("failed to build reqwest client: {e}"),
                )
            })?;

        Ok(Self { client, timeout })
    }

    async fn send_tcp(&self, url: &Url, data: &[u8]) -> Result<Vec<u8>> {
        let addr = format!(
            "{}:{}",
            url.host_str().unwrap_or_default(),
            url.port().unwrap_or(KERBEROS_PORT)
        );

        let mut stream = timeout(self.timeout, TcpStream::connect(addr))
            .await?
            .map_err(|e| Error::new(ErrorKind::NoAuthenticatingAuthority, e))?;

        stream
            .write_all(data)
            .await
            .map_err(|e| Error::new(ErrorKind::NoAuthenticatingAuthority, e))?;

        let len = timeout(self.timeout, stream.read_u32())
            .await?
            .map_err(|e| Error::new(ErrorKind::NoAuthenticatingAuthority, e))?;

        if len > MAX_TCP_REPLY_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidToken,
                format!("KDC reply of {} bytes exceeds {} bytes", len, MAX_TCP_REPLY_SIZE),
            ));
        }

        let mut buf = vec![0; len as usize + 4];
        buf[0..4].copy_from_slice(&(len.to_be_bytes()));

        timeout(self.timeout, stream.read_exact(&mut buf[4..]))
            .await?
            .map_err(|e| Error::new(ErrorKind::NoAuthenticatingAuthority, e))?;

        Ok(buf)
    }

    async fn send_udp(&self, url: &Url, data: &[u8]) -> Result<Vec<u8>> {
        let udp_socket = UdpSocket::bind((IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)).await?;

        let addr = format!(
            "{}:{}",
            url.host_str().unwrap_or_default(),
            url.port().unwrap_or(KERBEROS_PORT)
        );

        udp_socket
            .send_to(data, addr)
            .await
            .map_err(|e| Error::new(ErrorKind::NoAuthenticatingAuthority, e))?;

        let mut buf = vec![0; MAX_UDP_REPLY_SIZE];

        let n = timeout(self.timeout, udp_socket.recv(&mut buf))
            .await?
            .map_err(|e| Error::new(ErrorKind::NoAuthenticatingAuthority, e))?;

        let mut reply_buf = Vec::with_capacity(n + 4);
        reply_buf.extend_from_slice(&(n as u32).to_be_bytes());
        reply_buf.extend_from_slice(&buf[0..n]);

        Ok(reply_buf)
    }

    async fn send_http(&self, url: &Url, data: &[u8]) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(url.clone())
            .body(data.to_vec())
            .send()
            .await
            .map_err(|err| {
                Error::new(
                    ErrorKind::NoAuthenticatingAuthority,
                    format!("unable to send the data to the KDC Proxy: {:?}", err),
                )
            })?
            .error_for_status()
            .map_err(|err| Error::new(ErrorKind::NoAuthenticatingAuthority, format!("KDC Proxy: {err}")))?;

        let body = response.bytes().await.map_err(|err| {
            Error::new(
                ErrorKind::NoAuthenticatingAuthority,
                format!("unable to read the response data from the KDC Proxy: {:?}", err),
            )
        })?;

        Ok(Vec::from(body))
    }
}

impl AsyncNetworkClient for TokioNetworkClient {
    fn send<'a>(&'a self, request: &'a NetworkRequest) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            match &request.protocol {
                NetworkProtocol::Tcp => self.send_tcp(&request.url, &request.data).await,
                NetworkProtocol::Udp => self.send_udp(&request.url, &request.data).await,
                NetworkProtocol::Http | NetworkProtocol::Https => self.send_http(&request.url, &request.data).await,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn tcp_reply_keeps_length_prefix() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let len = socket.read_u32().await.unwrap();
            let mut request = vec![0; len as usize];
            socket.read_exact(&mut request).await.unwrap();
            assert_eq!(request, [0x6a, 0x00]);

            socket.write_all(&[0, 0, 0, 3, 0x7e, 0x01, 0x02]).await.unwrap();
        });

        let client = TokioNetworkClient::new(Duration::from_secs(5)).unwrap();
        let request = NetworkRequest {
            protocol: NetworkProtocol::Tcp,
            url: Url::parse(&format!("tcp://127.0.0.1:{port}")).unwrap(),
            data: vec![0, 0, 0, 2, 0x6a, 0x00],
        };

        let reply = client.send(&request).await.unwrap();

        assert_eq!(reply, [0, 0, 0, 3, 0x7e, 0x01, 0x02]);
    }

    #[tokio::test]
    async fn oversized_tcp_reply_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0; 4];
            socket.read_exact(&mut request).await.unwrap();

            socket.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        });

        let client = TokioNetworkClient::new(Duration::from_secs(5)).unwrap();
        let request = NetworkRequest {
            protocol: NetworkProtocol::Tcp,
            url: Url::parse(&format!("tcp://127.0.0.1:{port}")).unwrap(),
            data: vec![0, 0, 0, 0],
        };

        let err = client.send(&request).await.unwrap_err();

        assert_eq!(err.error_type, ErrorKind::InvalidToken);
    }

    #[tokio::test]
    async fn udp_reply_gets_length_prefix() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0; 64];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], [0x6a, 0x00]);

            server.send_to(&[0x7e, 0x01], peer).await.unwrap();
        });

        let client = TokioNetworkClient::new(Duration::from_secs(5)).unwrap();
        let request = NetworkRequest {
            protocol: NetworkProtocol::Udp,
            url: Url::parse(&format!("udp://127.0.0.1:{port}")).unwrap(),
            data: vec![0x6a, 0x00],
        };

        assert_eq!(client.send(&request).await.unwrap(), [0, 0, 0, 2, 0x7e, 0x01]);
    }

    #[tokio::test]
    async fn refused_tcp_connection_is_no_authority() {
        // bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let client = TokioNetworkClient::new(Duration::from_secs(5)).unwrap();
        let request = NetworkRequest {
            protocol: NetworkProtocol::Tcp,
            url: Url::parse(&format!("tcp://127.0.0.1:{port}")).unwrap(),
            data: vec![0, 0, 0, 0],
        };

        let err = client.send(&request).await.unwrap_err();

        assert_eq!(err.error_type, ErrorKind::NoAuthenticatingAuthority);
    }
}
