//! Server wiring: builds every manager from `PbxConfig`, binds the UDP
//! transport, and runs the method-dispatch loop that hands each incoming
//! request to the right handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use pbx_media::MediaBridge;
use pbx_push::{PushGatewayClient, PushGatewayConfig, RateLimiter, RateLimiterConfig};
use pbx_registrar::{BruteForceGuard, DigestAuthenticator, ExtensionLookup, IpAuthMatcher, Registrar, RegistrarError, RegistrationNotifier};
use pbx_sip::{Method, StatusCode};
use pbx_transaction::{response_builders, IncomingRequest, TransactionManager, UdpTransport};
use pbx_trunk::TrunkRegistrar;

use crate::bye_cancel::ByeCancelHandler;
use crate::cdr::CdrStore;
use crate::config::PbxConfig;
use crate::database::{DatabaseManager, ExtensionStore, TrunkStore};
use crate::dialog::DialogManager;
use crate::error::Result;
use crate::invite_router::InviteRouter;
use crate::pending::PendingCallManager;

/// Everything the dispatch loop needs, already wired together. Built once
/// at startup by `PbxServer::build`, then consumed by `run`.
pub struct PbxServer {
    txn: Arc<TransactionManager>,
    socket: Arc<tokio::net::UdpSocket>,
    incoming: mpsc::UnboundedReceiver<IncomingRequest>,
    invite_router: Arc<InviteRouter>,
    bye_cancel: Arc<ByeCancelHandler>,
    registrar: Arc<Registrar>,
    extensions: Arc<ExtensionStore>,
    trunks: Arc<TrunkStore>,
    trunk_registrar: Arc<TrunkRegistrar>,
    rate_limiter: Arc<RateLimiter>,
    db: Arc<DatabaseManager>,
    config: PbxConfig,
}

impl PbxServer {
    pub async fn build(config: PbxConfig) -> Result<Self> {
        let bind_addr = std::net::SocketAddr::new(config.sip.host, config.sip.port);
        let transport = Arc::new(UdpTransport::bind(bind_addr).await?);
        let socket = transport.socket();
        let (txn, incoming) = TransactionManager::new(transport.clone());
        info!(local_addr = %txn.local_addr(), "SIP transport bound");

        let db = Arc::new(DatabaseManager::new(&config.database.url).await?);

        let extensions = Arc::new(ExtensionStore::new());
        extensions.refresh(&db).await?;

        let ip_auth = Arc::new(IpAuthMatcher::new());
        let guard = Arc::new(BruteForceGuard::new());
        let digest_auth = Arc::new(DigestAuthenticator::new(&config.auth.realm, &config.auth.opaque, guard));
        let notifier = Arc::new(RegistrationNotifier::new());

        let extensions_lookup: Arc<dyn ExtensionLookup> = extensions.clone();
        let registrar = Arc::new(Registrar::new(extensions_lookup, digest_auth.clone(), notifier.clone()));

        let trunk_registrar = Arc::new(TrunkRegistrar::new(txn.clone(), ip_auth.clone()));
        let runtime_trunk_registrar = trunk_registrar.clone();
        let trunks = Arc::new(TrunkStore::new(Arc::new(move |id| {
            runtime_trunk_registrar.runtime_state(id).map(|s| s.status)
        })));
        trunks.refresh(&db).await?;
        for trunk in trunks.enabled_trunks() {
            ip_auth.add_trunk(trunk.id, &trunk.name, trunk.priority, &trunk.remote_hosts);
            trunk_registrar.start_trunk(trunk).await;
        }

        let rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
            rate: config.push.rate_limit_per_sec,
            burst: config.push.rate_limit_burst,
            max_age: Duration::from_secs(10 * 60),
        }));
        let push_client = Arc::new(PushGatewayClient::new(
            PushGatewayConfig { base_url: config.push.gateway_base_url.clone(), license_key: config.push.license_key.clone() },
            rate_limiter.clone(),
        ));

        let media = Arc::new(MediaBridge::new(config.media.proxy_ip, config.media.rtp_port_min, config.media.rtp_port_max));
        let dialogs = Arc::new(DialogManager::new());
        let pending = Arc::new(PendingCallManager::new(txn.clone()));
        let cdrs = Arc::new(CdrStore::new());

        let invite_router = Arc::new(InviteRouter {
            txn: txn.clone(),
            ip_auth,
            digest_auth,
            extensions_by_username: extensions.clone(),
            extensions_by_number: extensions.clone(),
            registrar: registrar.clone(),
            notifier,
            push_client,
            trunks: trunks.clone(),
            media,
            dialogs: dialogs.clone(),
            pending: pending.clone(),
            cdrs: cdrs.clone(),
            db: db.clone(),
            ring_timeout: Duration::from_secs(config.sip.ring_timeout_secs),
            push_wait_timeout: Duration::from_secs(config.push.push_wait_timeout_secs),
        });

        let bye_cancel = Arc::new(ByeCancelHandler { txn: txn.clone(), dialogs, pending, cdrs, db: db.clone() });

        Ok(Self { txn, socket, incoming, invite_router, bye_cancel, registrar, extensions, trunks, trunk_registrar, rate_limiter, db, config })
    }

    /// Binds the transport's receive loop and the periodic background
    /// tasks (reaper, rate-limiter janitor, directory refresh), then
    /// drains `incoming` until the socket closes.
    pub async fn run(mut self) -> Result<()> {
        let socket = self.socket.clone();
        let recv_txn = self.txn.clone();
        tokio::spawn(async move { recv_txn.run(socket).await });

        self.registrar.clone().start_reaper().await;

        let janitor = self.rate_limiter.clone();
        tokio::spawn(async move { janitor.start_janitor(Duration::from_secs(60)).await });

        let extensions = self.extensions.clone();
        let trunks = self.trunks.clone();
        let db = self.db.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                if let Err(e) = extensions.refresh(&db).await {
                    warn!(error = %e, "failed to refresh extension directory");
                }
                if let Err(e) = trunks.refresh(&db).await {
                    warn!(error = %e, "failed to refresh trunk directory");
                }
            }
        });

        info!("PBX core dispatch loop started");
        while let Some(incoming) = self.incoming.recv().await {
            self.dispatch(incoming).await;
        }
        Ok(())
    }

    async fn dispatch(&self, incoming: IncomingRequest) {
        let request = incoming.request;
        let Some(source) = request.source else {
            warn!(method = %request.method.as_str(), "request arrived with no source address, dropping");
            return;
        };

        match request.method {
            Method::Invite => {
                let router = self.invite_router.clone();
                tokio::spawn(async move { router.handle_invite(request, source).await });
            }
            Method::Bye => {
                let handler = self.bye_cancel.clone();
                tokio::spawn(async move { handler.handle_bye(request, source).await });
            }
            Method::Cancel => {
                let handler = self.bye_cancel.clone();
                tokio::spawn(async move { handler.handle_cancel(request, source).await });
            }
            Method::Register => {
                let registrar = self.registrar.clone();
                let txn = self.txn.clone();
                tokio::spawn(async move {
                    let server_tx = match txn.create_server_transaction(request.clone(), source).await {
                        Ok(tx) => tx,
                        Err(e) => {
                            warn!(error = %e, "failed to create server transaction for REGISTER");
                            return;
                        }
                    };
                    let response = match registrar.handle_register(&request, &source.to_string()) {
                        Ok(response) => response,
                        Err(e) => response_builders::create_response(&request, register_error_status(&e)),
                    };
                    let _ = txn.send_response(server_tx.id(), response).await;
                });
            }
            Method::Options => {
                let txn = self.txn.clone();
                tokio::spawn(async move {
                    let server_tx = match txn.create_server_transaction(request.clone(), source).await {
                        Ok(tx) => tx,
                        Err(e) => {
                            warn!(error = %e, "failed to create server transaction for OPTIONS");
                            return;
                        }
                    };
                    let response = response_builders::create_response(&request, StatusCode::OK);
                    let _ = txn.send_response(server_tx.id(), response).await;
                });
            }
            Method::Ack => {
                // ACK for a 2xx is out-of-transaction and already consumed
                // by the forker/outbound leg that sent the original INVITE
                // response; nothing left for the dispatch loop to do.
            }
            other => {
                let txn = self.txn.clone();
                tokio::spawn(async move {
                    if let Ok(server_tx) = txn.create_server_transaction(request.clone(), source).await {
                        let response = response_builders::create_response(&request, StatusCode(501));
                        let _ = txn.send_response(server_tx.id(), response).await;
                    }
                    warn!(method = %other.as_str(), "unsupported method");
                });
            }
        }
    }

    pub fn config(&self) -> &PbxConfig {
        &self.config
    }
}

fn register_error_status(error: &RegistrarError) -> StatusCode {
    match error {
        RegistrarError::AuthBlocked => StatusCode::FORBIDDEN,
        RegistrarError::AuthBadRequest(_) => StatusCode::BAD_REQUEST,
        RegistrarError::AuthChallenge => StatusCode::UNAUTHORIZED,
        RegistrarError::UnknownExtension(_) => StatusCode::NOT_FOUND,
        RegistrarError::RegistrationLimitReached(_) => StatusCode::FORBIDDEN,
        RegistrarError::MissingHeader(_) => StatusCode::BAD_REQUEST,
        RegistrarError::Sip(_) | RegistrarError::Transaction(_) => StatusCode::SERVER_INTERNAL_ERROR,
    }
}
