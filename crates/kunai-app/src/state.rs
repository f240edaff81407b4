use std::sync::Arc;
use std::time::Duration;

use kunai_core::config::Settings;
use kunai_core::error::CoreError;
use kunai_service::address::{AddressClassifier, DeliveryKind};
use kunai_service::delivery::{CalDavDelivery, IScheduleDelivery, ImipDelivery};
use kunai_service::directory::{Directory, HttpMailGateway, MailGateway, Mailbox, MemoryDirectory, MemoryMailbox};
use kunai_service::dkim::{DkimSigner, DkimVerifier, KeyCache};
use kunai_service::net::{HickoryHostResolver, HostResolver};
use kunai_service::registry::{LocalServers, ServerRegistry};
use kunai_service::scheduling::{Accounting, ISchedulePolicy, ImipPolicy, Scheduler, UidLocks};
use salvo::async_trait;

use crate::error::AppResult;

/// Everything the HTTP handlers share.
pub struct AppState {
    pub scheduler: Scheduler,
    /// Key published under the well-known domainkey route.
    pub signer: Option<Arc<DkimSigner>>,
    /// Changes whenever the advertised capabilities may have changed.
    pub capabilities_serial: u64,
}

impl AppState {
    /// ## Summary
    /// Builds the scheduler and its collaborators from configuration.
    ///
    /// The registry and pod files are read eagerly so a broken file stops
    /// startup rather than the first delivery.
    ///
    /// ## Errors
    /// Returns an error if a configured file cannot be read or parsed, a
    /// key is invalid, or an HTTP client cannot be built.
    #[tracing::instrument(skip_all)]
    pub async fn from_settings(settings: &Settings) -> AppResult<Self> {
        let resolver: Arc<dyn HostResolver> = Arc::new(HickoryHostResolver::new());
        let this_server_id = settings.federation.this_server_id.as_deref();

        let registry = match (&settings.ischedule.servers_file, settings.ischedule.enabled) {
            (Some(path), true) => {
                let registry = ServerRegistry::from_file(path);
                registry.reload()?;
                Some(Arc::new(registry))
            }
            _ => None,
        };

        let local_servers = match &settings.federation.servers_file {
            Some(path) => LocalServers::load(path, this_server_id, resolver.as_ref()).await?,
            None => LocalServers::empty(),
        };
        let local_servers = Arc::new(local_servers);

        let directory: Arc<dyn Directory> = Arc::new(MemoryDirectory::from_config(
            &settings.directory,
            this_server_id,
        ));
        let mailbox: Arc<dyn Mailbox> = Arc::new(MemoryMailbox::new());
        let classifier = Arc::new(AddressClassifier::new(settings, registry.clone())?);

        let signer = DkimSigner::from_config(&settings.dkim)?.map(Arc::new);
        let verifier = if settings.dkim.enabled {
            let cache = Arc::new(KeyCache::from_seconds(settings.dkim.key_cache_ttl_seconds));
            Some(Arc::new(DkimVerifier::from_config(
                &settings.dkim,
                Arc::clone(&resolver),
                cache,
            )?))
        } else {
            None
        };
        if settings.ischedule.require_dkim && verifier.is_none() {
            return Err(CoreError::ConfigError(
                "ischedule.require_dkim needs dkim.enabled".to_string(),
            )
            .into());
        }

        let timeout = Duration::from_secs(settings.ischedule.request_timeout_seconds);
        let gateway = match &settings.imip.gateway_url {
            Some(url) => Some(Arc::new(HttpMailGateway::new(url.as_str(), timeout)?) as Arc<dyn MailGateway>),
            None => None,
        };

        let locks = UidLocks::new(
            Duration::from_secs(settings.scheduling.uid_lock_timeout_seconds),
            Duration::from_secs(settings.scheduling.uid_lock_expiry_seconds),
        );

        let mut scheduler = Scheduler::new(Arc::clone(&directory), classifier, locks)
            .with_delivery(Arc::new(CalDavDelivery::new(mailbox)))
            .with_delivery(Arc::new(IScheduleDelivery::new(
                DeliveryKind::Federation,
                None,
                Arc::clone(&local_servers),
                Arc::clone(&directory),
                None,
                timeout,
            )?))
            .with_accounting(Accounting::from_config(&settings.scheduling.accounting))
            .with_freebusy_limit(settings.scheduling.limit_freebusy_attendees);

        if settings.ischedule.enabled {
            scheduler = scheduler
                .with_delivery(Arc::new(IScheduleDelivery::new(
                    DeliveryKind::ISchedule,
                    registry.clone(),
                    Arc::clone(&local_servers),
                    Arc::clone(&directory),
                    signer.clone(),
                    timeout,
                )?))
                .with_ischedule_policy(Arc::new(ISchedulePolicy::new(
                    verifier,
                    settings.ischedule.require_dkim,
                    registry,
                    Arc::clone(&local_servers),
                    Arc::clone(&resolver),
                )));
        }
        if settings.imip.enabled {
            scheduler = scheduler
                .with_delivery(Arc::new(ImipDelivery::new(gateway)))
                .with_imip_policy(Arc::new(ImipPolicy::new(
                    settings.imip.mail_gateway_host.as_str(),
                    Arc::clone(&resolver),
                )));
        }

        tracing::info!(
            ischedule = settings.ischedule.enabled,
            imip = settings.imip.enabled,
            signing = signer.is_some(),
            "Scheduler ready"
        );

        Ok(Self {
            scheduler,
            signer,
            capabilities_serial: u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default(),
        })
    }
}

pub struct StateHandler {
    pub state: Arc<AppState>,
}

#[async_trait]
impl salvo::Handler for StateHandler {
    #[tracing::instrument(skip(self, _req, depot, _res, _ctrl))]
    async fn handle(
        &self,
        _req: &mut salvo::Request,
        depot: &mut salvo::Depot,
        _res: &mut salvo::Response,
        _ctrl: &mut salvo::FlowCtrl,
    ) {
        depot.inject(Arc::clone(&self.state));
    }
}

/// ## Summary
/// Retrieves the shared application state from the depot.
///
/// ## Errors
/// Returns an error if the state is not found in the depot.
pub fn get_state_from_depot(depot: &salvo::Depot) -> AppResult<Arc<AppState>> {
    depot
        .obtain::<Arc<AppState>>()
        .cloned()
        .map_err(|_err| CoreError::InvariantViolation("Application state not found in depot").into())
}
