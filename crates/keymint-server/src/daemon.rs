//! The daemon loop — accepts connections and serves keychain requests.
//!
//! Each connection carries line-delimited JSON requests. Engine work is
//! dispatched on the blocking pool and raced against the configured
//! per-request deadline; a miss answers `DEADLINE_EXCEEDED` (the engine
//! writes state atomically, so an abandoned request never leaves a
//! partial record behind).

use crate::config::{ServerConfig, StoreBackend};
use crate::wire::{error_code, Request, Response};
use anyhow::{Context, Result};
use keymint_core::Error as CodecError;
use keymint_engine::{AccountSource, CreateKeychain, EngineError, KeychainEngine};
use keymint_store::{MemoryStore, SqliteStore, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

type Engine = KeychainEngine<Box<dyn Store>>;

/// Run the daemon. Blocks forever (until shutdown signal).
pub async fn run(config: ServerConfig) -> Result<()> {
    log::info!("Keymint server starting…");
    log::info!("  Listen:  {}", config.server.listen_addr);
    log::info!("  Backend: {:?}", config.store.backend);
    if config.store.backend == StoreBackend::Sqlite {
        log::info!("  Store:   {}", config.store.path.display());
    }
    log::info!("  Timeout: {} ms", config.server.request_timeout_ms);

    let engine = Arc::new(build_engine(&config)?);
    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen_addr))?;
    let timeout = Duration::from_millis(config.server.request_timeout_ms);

    serve(listener, engine, timeout).await
}

/// Build the engine over the configured store backend.
pub fn build_engine(config: &ServerConfig) -> Result<Engine> {
    let store: Box<dyn Store> = match config.store.backend {
        StoreBackend::Memory => Box::new(MemoryStore::new()),
        StoreBackend::Sqlite => Box::new(
            SqliteStore::open(&config.store.path).with_context(|| {
                format!("Failed to open store at {}", config.store.path.display())
            })?,
        ),
    };
    Ok(KeychainEngine::new(store))
}

/// Accept loop; split out so tests can bind an ephemeral port.
pub async fn serve(listener: TcpListener, engine: Arc<Engine>, timeout: Duration) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("Listening on {addr}");
    }
    loop {
        let (socket, peer) = listener.accept().await.context("accept failed")?;
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(engine, socket, timeout).await {
                log::debug!("Connection from {peer} ended: {e:#}");
            }
        });
    }
}

async fn serve_connection(
    engine: Arc<Engine>,
    socket: TcpStream,
    timeout: Duration,
) -> Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle_request(engine.clone(), request, timeout).await,
            Err(e) => Response::error("MALFORMED_REQUEST", e.to_string()),
        };
        let mut out = serde_json::to_string(&response).context("response encoding")?;
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
    }
    Ok(())
}

async fn handle_request(engine: Arc<Engine>, request: Request, deadline: Duration) -> Response {
    let work = tokio::task::spawn_blocking(move || dispatch(&engine, request));
    match tokio::time::timeout(deadline, work).await {
        Err(_) => Response::error(
            "DEADLINE_EXCEEDED",
            format!("request exceeded the {} ms deadline", deadline.as_millis()),
        ),
        Ok(Err(join_error)) => Response::error("INTERNAL", join_error.to_string()),
        Ok(Ok(Ok(value))) => Response::ok(value),
        Ok(Ok(Err(e))) => Response::error(error_code(&e), e.to_string()),
    }
}

fn dispatch(engine: &Engine, request: Request) -> Result<serde_json::Value, EngineError> {
    match request {
        Request::CreateKeychain {
            descriptor,
            extended_public_key,
            public_key,
            chain_code,
            account_index,
            scheme,
            network,
            lookahead,
        } => {
            let source = account_source(extended_public_key, public_key, chain_code, account_index)?;
            let scheme: keymint_core::Scheme = scheme.parse().map_err(EngineError::Codec)?;
            let network: keymint_core::Network = network.parse().map_err(EngineError::Codec)?;
            let info = engine.create_keychain(CreateKeychain {
                descriptor,
                source,
                scheme,
                network,
                lookahead,
            })?;
            Ok(serde_json::to_value(info)?)
        }
        Request::GetFreshAddresses {
            descriptor,
            change,
            count,
        } => Ok(serde_json::to_value(
            engine.get_fresh_addresses(&descriptor, change, count)?,
        )?),
        Request::MarkPathAsUsed { descriptor, path } => {
            let path: keymint_core::DerivationPath =
                path.parse().map_err(EngineError::Codec)?;
            Ok(serde_json::to_value(
                engine.mark_path_as_used(&descriptor, path)?,
            )?)
        }
        Request::MarkAddressesAsUsed {
            descriptor,
            addresses,
        } => Ok(serde_json::to_value(
            engine.mark_addresses_as_used(&descriptor, &addresses)?,
        )?),
        Request::GetAllObservableAddresses {
            descriptor,
            change,
            from,
            to,
        } => Ok(serde_json::to_value(
            engine.get_all_observable_addresses(&descriptor, change, from, to)?,
        )?),
        Request::GetAllObservableIndexes {
            descriptor,
            change,
            from,
            to,
        } => Ok(serde_json::to_value(
            engine.get_all_observable_indexes(&descriptor, change, from, to)?,
        )?),
        Request::GetMaxObservableIndex { descriptor, change } => Ok(serde_json::to_value(
            engine.get_max_observable_index(&descriptor, change)?,
        )?),
        Request::GetAccountExtendedKey { descriptor } => Ok(serde_json::to_value(
            engine.get_account_extended_key(&descriptor)?,
        )?),
        Request::GetKeychainInfo { descriptor } => Ok(serde_json::to_value(
            engine.get_keychain_info(&descriptor)?,
        )?),
        Request::DeleteKeychain { descriptor } => {
            engine.delete_keychain(&descriptor)?;
            Ok(serde_json::Value::Null)
        }
    }
}

/// Assemble the account source from the request's alternative field
/// sets: a serialized xpub, or raw hex material.
fn account_source(
    extended_public_key: Option<String>,
    public_key: Option<String>,
    chain_code: Option<String>,
    account_index: Option<u32>,
) -> Result<AccountSource, EngineError> {
    if let Some(encoded) = extended_public_key {
        return Ok(AccountSource::ExtendedPublicKey(encoded));
    }
    let (public_key, chain_code, account_index) = match (public_key, chain_code, account_index) {
        (Some(pk), Some(cc), Some(index)) => (pk, cc, index),
        _ => {
            return Err(CodecError::MalformedKey(
                "create_keychain needs extended_public_key, or public_key + chain_code + account_index"
                    .to_string(),
            )
            .into())
        }
    };
    let public_key = hex::decode(&public_key)
        .map_err(|e| CodecError::MalformedKey(format!("public_key hex: {e}")))?;
    let chain_code: [u8; 32] = hex::decode(&chain_code)
        .map_err(|e| CodecError::MalformedKey(format!("chain_code hex: {e}")))?
        .try_into()
        .map_err(|_| CodecError::MalformedKey("chain_code must be 32 bytes".to_string()))?;
    Ok(AccountSource::AccountMaterial {
        public_key,
        chain_code,
        account_index,
    })
}
