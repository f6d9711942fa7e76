// Standard library imports
use std::fmt::Debug;
use std::time::Duration;

// Async runtime and utilities
use async_trait::async_trait;
use futures_util::stream::TryStreamExt;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_native_tls::{native_tls, TlsConnector};
use tokio_util::compat::TokioAsyncReadCompatExt;

// IMAP types and client
use async_imap::extensions::idle::IdleResponse;
use async_imap::{Client as AsyncImapClient, Session as AsyncImapSession};
use chrono::{DateTime, Utc};

use super::error::TransportError;
use super::transport::{MailSession, MailTransport, RawMessage, SessionEvent};
use crate::models::{Account, ImapConfig};

/// Fetch attributes for full message retrieval. BODY.PEEK keeps the
/// server from flagging messages as seen on our behalf.
const FETCH_ITEMS: &str = "(UID INTERNALDATE BODY.PEEK[])";

/// [`MailTransport`] over async-imap with native TLS.
pub struct ImapTransport {
    login_timeout: Duration,
}

impl ImapTransport {
    pub fn new(login_timeout: Duration) -> Self {
        Self { login_timeout }
    }
}

#[async_trait]
impl MailTransport for ImapTransport {
    async fn connect(&self, account: &Account) -> Result<Box<dyn MailSession>, TransportError> {
        let imap = &account.imap;
        debug!(
            "attempting TCP connection to {}:{} for {}",
            imap.host, imap.port, account.email_address
        );
        let tcp_stream = TcpStream::connect((imap.host.as_str(), imap.port)).await?;

        let session: Box<dyn MailSession> = if imap.use_tls {
            let tls = native_tls::TlsConnector::builder().build()?;
            let tls = TlsConnector::from(tls);
            let tls_stream = tls
                .connect(&imap.host, tcp_stream)
                .await
                .map_err(|e| TransportError::Tls(e.to_string()))?;
            let client = AsyncImapClient::new(tls_stream.compat());
            let session = perform_login(client, imap, self.login_timeout).await?;
            Box::new(ImapMailSession::new(session))
        } else {
            warn!(
                "connecting to {}:{} without TLS",
                imap.host, imap.port
            );
            let client = AsyncImapClient::new(tcp_stream.compat());
            let session = perform_login(client, imap, self.login_timeout).await?;
            Box::new(ImapMailSession::new(session))
        };

        info!("IMAP session established for {}", account.email_address);
        Ok(session)
    }
}

/// Performs IMAP login with a timeout guard.
async fn perform_login<S>(
    client: AsyncImapClient<S>,
    imap: &ImapConfig,
    login_timeout: Duration,
) -> Result<AsyncImapSession<S>, TransportError>
where
    S: futures_util::io::AsyncRead + futures_util::io::AsyncWrite + Unpin + Send + Debug,
{
    match timeout(login_timeout, client.login(&imap.username, &imap.password)).await {
        Ok(Ok(session)) => {
            debug!("IMAP login successful for user {}", imap.username);
            Ok(session)
        }
        Ok(Err((e, _client))) => Err(TransportError::Auth(e.to_string())),
        Err(_) => Err(TransportError::Timeout(format!(
            "login to {} timed out after {:?}",
            imap.host, login_timeout
        ))),
    }
}

/// One owned async-imap session. `session` is `None` only after the
/// connection has been closed or torn down mid-IDLE.
struct ImapMailSession<S>
where
    S: futures_util::io::AsyncRead + futures_util::io::AsyncWrite + Unpin + Send + Debug + 'static,
{
    session: Option<AsyncImapSession<S>>,
}

impl<S> ImapMailSession<S>
where
    S: futures_util::io::AsyncRead + futures_util::io::AsyncWrite + Unpin + Send + Debug + 'static,
{
    fn new(session: AsyncImapSession<S>) -> Self {
        Self { session: Some(session) }
    }

    fn session_mut(&mut self) -> Result<&mut AsyncImapSession<S>, TransportError> {
        self.session.as_mut().ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl<S> MailSession for ImapMailSession<S>
where
    S: futures_util::io::AsyncRead + futures_util::io::AsyncWrite + Unpin + Send + Debug + 'static,
{
    async fn select_mailbox(&mut self, name: &str) -> Result<(), TransportError> {
        self.session_mut()?
            .select(name)
            .await
            .map(|_| ())
            .map_err(TransportError::from)
    }

    async fn search_since(&mut self, since: DateTime<Utc>) -> Result<Vec<u32>, TransportError> {
        // IMAP SINCE has date granularity; the English month
        // abbreviation is part of the protocol, not a locale choice.
        let criteria = format!("SINCE {}", since.format("%d-%b-%Y"));
        let uid_set = self
            .session_mut()?
            .uid_search(&criteria)
            .await
            .map_err(TransportError::from)?;
        let mut uids: Vec<u32> = uid_set.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn search_unseen(&mut self) -> Result<Vec<u32>, TransportError> {
        let uid_set = self
            .session_mut()?
            .uid_search("UNSEEN")
            .await
            .map_err(TransportError::from)?;
        let mut uids: Vec<u32> = uid_set.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch_batch(&mut self, uids: &[u32]) -> Result<Vec<RawMessage>, TransportError> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let sequence = uids
            .iter()
            .map(|uid| uid.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let session = self.session_mut()?;
        let mut messages = Vec::with_capacity(uids.len());
        let mut fetch_stream = session
            .uid_fetch(&sequence, FETCH_ITEMS)
            .await
            .map_err(TransportError::from)?;

        while let Some(fetch) = fetch_stream.try_next().await.map_err(TransportError::from)? {
            let uid = match fetch.uid {
                Some(uid) => uid,
                None => {
                    warn!("fetch result without UID, skipping");
                    continue;
                }
            };
            let body = match fetch.body() {
                Some(body) => body.to_vec(),
                None => {
                    warn!("fetch result for UID {} has no body, skipping", uid);
                    continue;
                }
            };
            messages.push(RawMessage {
                uid,
                body,
                internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
            });
        }
        Ok(messages)
    }

    async fn next_event(&mut self, idle_window: Duration) -> Result<SessionEvent, TransportError> {
        // IDLE consumes the session; it comes back from done() below.
        let session = self.session.take().ok_or(TransportError::Closed)?;
        let mut idle = session.idle();
        if let Err(e) = idle.init().await {
            return Err(TransportError::from(e));
        }

        let (idle_wait, _interrupt) = idle.wait_with_timeout(idle_window);
        let response = idle_wait.await;

        match response {
            Ok(response) => {
                let session = idle.done().await.map_err(TransportError::from)?;
                self.session = Some(session);
                match response {
                    IdleResponse::NewData(_) => Ok(SessionEvent::NewMail { count: 1 }),
                    IdleResponse::Timeout | IdleResponse::ManualInterrupt => {
                        Ok(SessionEvent::KeepAlive)
                    }
                }
            }
            // The connection is gone; the session stays None and any
            // further call reports Closed.
            Err(e) => Err(TransportError::from(e)),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.session.take() {
            Some(mut session) => {
                if let Err(e) = session.logout().await {
                    debug!("logout failed, dropping connection anyway: {}", e);
                }
                Ok(())
            }
            None => Ok(()),
        }
    }
}
