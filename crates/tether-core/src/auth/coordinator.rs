//! Token lifecycle coordination.
//!
//! A single background task owns the current credential and the in-flight
//! refresh. Callers talk to it through [`TokenCoordinator`], a cloneable handle
//! that sends commands and awaits the reply. Because every command is handled
//! in order by one task, concurrent callers that find the credential near
//! expiry attach to the same refresh instead of racing to start their own.

use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::credential::{
    Credential, CredentialStore, ACCESS_TOKEN_KEY, DEFAULT_REFRESH_THRESHOLD, REFRESH_TOKEN_KEY,
};
use super::jwt::JwtValidator;
use super::transport::{RefreshGrant, RefreshTransport};
use super::{RefreshFailure, TokenError, TokenResult};
use crate::error::NetworkError;

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<TokenResult<T>>;

enum Command {
    GetValid(Reply<Credential>),
    ForceRefresh(Reply<Credential>),
    Current(Reply<Option<Credential>>),
    Install {
        access_token: String,
        refresh_token: String,
        reply: Reply<Credential>,
    },
    SignOut(Reply<()>),
}

struct Completion {
    generation: u64,
    refresh_token: String,
    result: Result<RefreshGrant, NetworkError>,
}

struct InFlightRefresh {
    generation: u64,
    handle: JoinHandle<()>,
    waiters: Vec<Reply<Credential>>,
}

/// Handle to the credential-owning task.
#[derive(Clone)]
pub struct TokenCoordinator {
    commands: mpsc::Sender<Command>,
    refresh_threshold: TimeDelta,
}

impl TokenCoordinator {
    /// Spawn the coordinator task on the current tokio runtime.
    ///
    /// The task exits once every handle has been dropped.
    pub fn spawn(
        store: Arc<dyn CredentialStore>,
        validator: JwtValidator,
        transport: Arc<dyn RefreshTransport>,
    ) -> Self {
        Self::spawn_with_threshold(store, validator, transport, DEFAULT_REFRESH_THRESHOLD)
    }

    pub fn spawn_with_threshold(
        store: Arc<dyn CredentialStore>,
        validator: JwtValidator,
        transport: Arc<dyn RefreshTransport>,
        refresh_threshold: TimeDelta,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (completions, completion_rx) = mpsc::unbounded_channel();
        let task = CoordinatorTask {
            store,
            validator,
            transport,
            refresh_threshold,
            current: None,
            in_flight: None,
            generation: 0,
            completions,
        };
        tokio::spawn(task.run(command_rx, completion_rx));

        Self {
            commands,
            refresh_threshold,
        }
    }

    pub const fn refresh_threshold(&self) -> TimeDelta {
        self.refresh_threshold
    }

    /// Return a credential that does not need refreshing, refreshing it first
    /// if necessary. Concurrent callers share one refresh.
    pub async fn get_valid_token(&self) -> TokenResult<Credential> {
        self.request(Command::GetValid).await
    }

    /// Abandon any in-flight refresh and refresh unconditionally.
    pub async fn force_refresh(&self) -> TokenResult<Credential> {
        self.request(Command::ForceRefresh).await
    }

    /// The stored credential as-is, without refreshing.
    pub async fn current(&self) -> TokenResult<Option<Credential>> {
        self.request(Command::Current).await
    }

    /// Persist a freshly issued credential pair, e.g. after sign-in.
    pub async fn install(
        &self,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> TokenResult<Credential> {
        let access_token = access_token.into();
        let refresh_token = refresh_token.into();
        self.request(|reply| Command::Install {
            access_token,
            refresh_token,
            reply,
        })
        .await
    }

    pub async fn sign_out(&self) -> TokenResult<()> {
        self.request(Command::SignOut).await
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> TokenResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| TokenError::CoordinatorClosed)?;
        response.await.map_err(|_| TokenError::CoordinatorClosed)?
    }
}

struct CoordinatorTask {
    store: Arc<dyn CredentialStore>,
    validator: JwtValidator,
    transport: Arc<dyn RefreshTransport>,
    refresh_threshold: TimeDelta,
    current: Option<Credential>,
    in_flight: Option<InFlightRefresh>,
    generation: u64,
    completions: mpsc::UnboundedSender<Completion>,
}

impl CoordinatorTask {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(completion) = completions.recv() => self.handle_completion(completion),
            }
        }

        if let Some(in_flight) = self.in_flight.take() {
            in_flight.handle.abort();
        }
        tracing::debug!("Token coordinator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::GetValid(reply) => self.get_valid(reply),
            Command::ForceRefresh(reply) => self.force_refresh(reply),
            Command::Current(reply) => {
                let current = match self.load_current() {
                    Ok(credential) => Ok(Some(credential)),
                    Err(TokenError::TokenUnavailable) => Ok(None),
                    Err(error) => Err(error),
                };
                let _ = reply.send(current);
            }
            Command::Install {
                access_token,
                refresh_token,
                reply,
            } => {
                let result = self.install(access_token, refresh_token);
                if let Some(in_flight) = self.abandon_in_flight() {
                    for waiter in in_flight.waiters {
                        let _ = waiter.send(result.clone());
                    }
                }
                let _ = reply.send(result);
            }
            Command::SignOut(reply) => {
                if let Some(in_flight) = self.abandon_in_flight() {
                    for waiter in in_flight.waiters {
                        let _ = waiter.send(Err(TokenError::TokenUnavailable));
                    }
                }
                let result = self.clear_credentials().map_err(TokenError::from);
                tracing::info!("Signed out; stored credentials cleared");
                let _ = reply.send(result);
            }
        }
    }

    fn get_valid(&mut self, reply: Reply<Credential>) {
        let credential = match self.load_current() {
            Ok(credential) => credential,
            Err(error) => {
                let _ = reply.send(Err(error));
                return;
            }
        };

        if !credential.should_refresh_at(Utc::now(), self.refresh_threshold) {
            let _ = reply.send(Ok(credential));
            return;
        }

        if let Some(in_flight) = self.in_flight.as_mut() {
            tracing::debug!(
                generation = in_flight.generation,
                "Joining in-flight token refresh"
            );
            in_flight.waiters.push(reply);
            return;
        }

        self.start_refresh(credential.refresh_token, vec![reply]);
    }

    fn force_refresh(&mut self, reply: Reply<Credential>) {
        let refresh_token = match self.stored_refresh_token() {
            Ok(token) => token,
            Err(error) => {
                let _ = reply.send(Err(error));
                return;
            }
        };

        let mut waiters = self
            .abandon_in_flight()
            .map(|in_flight| in_flight.waiters)
            .unwrap_or_default();
        waiters.push(reply);
        self.start_refresh(refresh_token, waiters);
    }

    fn start_refresh(&mut self, refresh_token: String, waiters: Vec<Reply<Credential>>) {
        self.generation += 1;
        let generation = self.generation;
        let transport = Arc::clone(&self.transport);
        let completions = self.completions.clone();

        tracing::info!(generation, "Refreshing access token");
        let handle = tokio::spawn(async move {
            let result = transport.refresh(&refresh_token).await;
            let _ = completions.send(Completion {
                generation,
                refresh_token,
                result,
            });
        });

        self.in_flight = Some(InFlightRefresh {
            generation,
            handle,
            waiters,
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        let is_current = self
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == completion.generation);
        if !is_current {
            tracing::debug!(
                generation = completion.generation,
                "Ignoring result of abandoned token refresh"
            );
            return;
        }
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };

        let outcome = self.apply_refresh(completion.refresh_token, completion.result);
        for waiter in in_flight.waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn apply_refresh(
        &mut self,
        refresh_token: String,
        result: Result<RefreshGrant, NetworkError>,
    ) -> TokenResult<Credential> {
        let outcome = result
            .map_err(RefreshFailure::Network)
            .and_then(|grant| self.persist_grant(refresh_token, grant));

        match outcome {
            Ok(credential) => {
                tracing::info!(expires_at = %credential.expires_at, "Access token refreshed");
                self.current = Some(credential.clone());
                Ok(credential)
            }
            Err(failure) => {
                tracing::warn!("Token refresh failed, clearing stored credentials: {}", failure);
                if let Err(error) = self.clear_credentials() {
                    tracing::error!("Failed to clear credentials after refresh failure: {}", error);
                }
                Err(TokenError::RefreshFailed(failure))
            }
        }
    }

    fn persist_grant(
        &self,
        refresh_token: String,
        grant: RefreshGrant,
    ) -> Result<Credential, RefreshFailure> {
        if grant.expires_in <= 0 {
            return Err(RefreshFailure::InvalidGrant(format!(
                "non-positive expires_in {}",
                grant.expires_in
            )));
        }
        let issued_at = Utc::now();
        let expires_at = issued_at + TimeDelta::seconds(grant.expires_in);
        let credential = Credential {
            access_token: grant.access_token,
            refresh_token,
            issued_at,
            expires_at,
        };
        self.store
            .save(&credential.access_token, ACCESS_TOKEN_KEY)
            .map_err(RefreshFailure::Storage)?;
        Ok(credential)
    }

    fn install(&mut self, access_token: String, refresh_token: String) -> TokenResult<Credential> {
        let claims = self.validator.validate(&access_token)?;
        let credential = Credential::from_claims(access_token, refresh_token, &claims)?;
        self.store
            .save(&credential.access_token, ACCESS_TOKEN_KEY)?;
        self.store
            .save(&credential.refresh_token, REFRESH_TOKEN_KEY)?;
        tracing::info!(subject = %claims.subject, "Credential installed");
        self.current = Some(credential.clone());
        Ok(credential)
    }

    fn load_current(&mut self) -> TokenResult<Credential> {
        if let Some(credential) = &self.current {
            return Ok(credential.clone());
        }

        let access_token = self
            .store
            .get(ACCESS_TOKEN_KEY)?
            .ok_or(TokenError::TokenUnavailable)?;
        let refresh_token = self
            .store
            .get(REFRESH_TOKEN_KEY)?
            .ok_or(TokenError::TokenUnavailable)?;
        let claims = self.validator.validate(&access_token)?;
        let credential = Credential::from_claims(access_token, refresh_token, &claims)?;

        self.current = Some(credential.clone());
        Ok(credential)
    }

    fn stored_refresh_token(&self) -> TokenResult<String> {
        if let Some(credential) = &self.current {
            return Ok(credential.refresh_token.clone());
        }
        self.store
            .get(REFRESH_TOKEN_KEY)?
            .ok_or(TokenError::TokenUnavailable)
    }

    fn abandon_in_flight(&mut self) -> Option<InFlightRefresh> {
        let in_flight = self.in_flight.take()?;
        in_flight.handle.abort();
        tracing::debug!(generation = in_flight.generation, "Abandoned token refresh");
        Some(in_flight)
    }

    fn clear_credentials(&mut self) -> crate::error::StorageResult<()> {
        self.current = None;
        let access = self.store.delete(ACCESS_TOKEN_KEY);
        let refresh = self.store.delete(REFRESH_TOKEN_KEY);
        access.and(refresh)
    }
}
