use async_imap::{Client, Session};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::error::StoreError;
use crate::mail_store::{sequence_set, MailStore, RawMessage, SessionState};
use crate::settings::ImapConfig;

type TlsSession = Session<Compat<tokio_native_tls::TlsStream<TcpStream>>>;

/// Production mail store over one TLS IMAP session.
///
/// Owns the connection lifecycle: `connect` runs the TCP → TLS → LOGIN
/// sequence, `disconnect` is idempotent and swallows logout faults. Only
/// one folder is selected at a time; `select` replaces the previous
/// context.
pub struct ImapStore {
    config: ImapConfig,
    password: String,
    session: Option<TlsSession>,
    state: SessionState,
    current_folder: Option<String>,
}

impl ImapStore {
    pub fn new(config: ImapConfig, password: String) -> Self {
        ImapStore {
            config,
            password,
            session: None,
            state: SessionState::Disconnected,
            current_folder: None,
        }
    }

    fn session(&mut self) -> Result<&mut TlsSession, StoreError> {
        self.session.as_mut().ok_or(StoreError::NotConnected)
    }

    fn selected(&self) -> String {
        self.current_folder.clone().unwrap_or_default()
    }

    // TCP connect, TLS handshake and LOGIN, bounded by the configured
    // connection timeout.
    async fn establish(&mut self) -> Result<TlsSession, StoreError> {
        if !self.config.tls {
            // Credentials never travel in clear text.
            return Err(StoreError::Connect(
                "plain-text connections are not supported, set imap.tls to true".into(),
            ));
        }

        let server = self.config.server.clone();
        let addr = (server.as_str(), self.config.port);

        let connect = async {
            let tcp_stream = TcpStream::connect(addr)
                .await
                .map_err(|e| StoreError::Connect(e.to_string()))?;
            let tls = tokio_native_tls::TlsConnector::from(
                native_tls::TlsConnector::new().map_err(|e| StoreError::Connect(e.to_string()))?,
            );
            let tls_stream = tls
                .connect(&server, tcp_stream)
                .await
                .map_err(|e| StoreError::Connect(e.to_string()))?;

            info!("-- connected to {}:{}", server, self.config.port);

            let client = Client::new(tls_stream.compat());
            let session = client
                .login(&self.config.username, &self.password)
                .await
                .map_err(|e| StoreError::Connect(e.0.to_string()))?;

            info!("-- logged in as {}", self.config.username);
            Ok(session)
        };

        let timeout = std::time::Duration::from_secs(self.config.timeout_seconds);
        tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| StoreError::Connect(format!("timed out after {:?}", timeout)))?
    }
}

impl MailStore for ImapStore {
    async fn connect(&mut self) -> Result<(), StoreError> {
        self.state = SessionState::Connecting;
        match self.establish().await {
            Ok(session) => {
                self.session = Some(session);
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            // Be nice to the server; a failed logout must not block cleanup.
            if let Err(e) = session.logout().await {
                warn!("logout failed, dropping the session anyway: {}", e);
            }
        }
        self.current_folder = None;
        self.state = SessionState::Ended;
    }

    fn state(&self) -> SessionState {
        self.state
    }

    async fn list_folders(&mut self) -> Result<Vec<String>, StoreError> {
        let session = self.session()?;
        let mut list_stream = session
            .list(Some(""), Some("*"))
            .await
            .map_err(|e| StoreError::FolderList(e.to_string()))?;

        let mut folders = Vec::new();
        while let Some(item) = list_stream.next().await {
            match item {
                Ok(name) => folders.push(name.name().to_string()),
                Err(e) => warn!("skipping unreadable LIST item: {}", e),
            }
        }
        debug!("server reported {} folders", folders.len());
        Ok(folders)
    }

    async fn select(&mut self, folder: &str, read_only: bool) -> Result<(), StoreError> {
        let target = folder.to_string();
        let session = self.session()?;
        let mailbox = if read_only {
            session.examine(folder).await
        } else {
            session.select(folder).await
        };
        let mailbox = mailbox.map_err(|e| StoreError::Select {
            folder: target.clone(),
            reason: e.to_string(),
        })?;
        debug!("-- {} selected ({} messages)", target, mailbox.exists);
        self.current_folder = Some(target);
        Ok(())
    }

    async fn search(&mut self, criteria: &str) -> Result<Vec<u32>, StoreError> {
        let folder = self.selected();
        let session = self.session()?;
        let ids = session.search(criteria).await.map_err(|e| StoreError::Search {
            folder,
            reason: e.to_string(),
        })?;
        let mut ids: Vec<u32> = ids.into_iter().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn fetch(&mut self, seqs: &[u32]) -> Result<Vec<RawMessage>, StoreError> {
        if seqs.is_empty() {
            return Ok(Vec::new());
        }

        let range = sequence_set(seqs);
        let session = self.session()?;
        // BODY.PEEK keeps the server from setting \Seen as a fetch side
        // effect; the reconciler sets it explicitly later.
        let mut messages = session
            .fetch(&range, "(UID BODY.PEEK[])")
            .await
            .map_err(|e| StoreError::Fetch(e.to_string()))?;

        let mut raw = Vec::with_capacity(seqs.len());
        while let Some(item) = messages.next().await {
            match item {
                Ok(fetch) => {
                    // The UID attribute and the body arrive as parts of the
                    // same response; either may be absent independently.
                    match fetch.body() {
                        Some(body) => raw.push(RawMessage {
                            seq: fetch.message,
                            uid: fetch.uid,
                            body: body.to_vec(),
                        }),
                        None => warn!("message {} came back without a body", fetch.message),
                    }
                }
                Err(e) => warn!("skipping unreadable fetch response: {}", e),
            }
        }
        Ok(raw)
    }

    async fn add_flags(&mut self, uids: &[u32], flags: &str) -> Result<(), StoreError> {
        if uids.is_empty() {
            return Ok(());
        }

        let uid_set = sequence_set(uids);
        let flag_list = flags.to_string();
        let session = self.session()?;
        let store_stream = session
            .uid_store(&uid_set, format!("+FLAGS ({})", flags))
            .await
            .map_err(|e| StoreError::Flags {
                flags: flag_list.clone(),
                reason: e.to_string(),
            })?;

        // The untagged responses must be drained before the next command.
        let responses: Vec<_> = store_stream.collect().await;
        for response in responses {
            if let Err(e) = response {
                return Err(StoreError::Flags {
                    flags: flag_list,
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn uid_copy(&mut self, uids: &[u32], dest: &str) -> Result<(), StoreError> {
        if uids.is_empty() {
            return Ok(());
        }

        let uid_set = sequence_set(uids);
        let dest_name = dest.to_string();
        let session = self.session()?;
        session
            .uid_copy(&uid_set, dest)
            .await
            .map_err(|e| StoreError::Copy {
                dest: dest_name,
                reason: e.to_string(),
            })
    }

    async fn expunge(&mut self) -> Result<(), StoreError> {
        let session = self.session()?;
        let expunge_stream = session
            .expunge()
            .await
            .map_err(|e| StoreError::Expunge(e.to_string()))?;

        let removed: Vec<_> = expunge_stream.collect().await;
        for seq in &removed {
            if let Err(e) = seq {
                return Err(StoreError::Expunge(e.to_string()));
            }
        }
        debug!("expunged {} messages", removed.len());
        Ok(())
    }

    async fn create_folder(&mut self, name: &str) -> Result<(), StoreError> {
        let folder = name.to_string();
        let session = self.session()?;
        session.create(name).await.map_err(|e| StoreError::CreateFolder {
            folder,
            reason: e.to_string(),
        })
    }
}
