//! Check and hook execution

use crate::allow_list::AllowList;
use crate::assets::{AssetManager, Environment};
use crate::command::{self, truncate_output, ExecutionRequest, FAILURE_STATUS};
use crate::context::RuntimeContext;
use crate::error::{AgentError, AssetError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use vigil_proto::{unix_now, Asset, Check, CheckRequest, Entity, Event, Hook, HookConfig, ProtocolError};

/// Output of a check the allow-list refused to run
pub const CHECK_DENIED_OUTPUT: &str = "check command denied by the agent allow list";

/// Output of a hook the allow-list refused to run
pub const HOOK_DENIED_OUTPUT: &str = "hook command denied by the agent allow list";

/// Payload written to stdin of commands that request it
#[derive(Serialize)]
struct StdinPayload<'a> {
    entity: &'a Entity,
    check: &'a Check,
}

/// Turns check requests into result events
#[derive(Clone)]
pub struct CheckExecutor {
    ctx: RuntimeContext,
    assets: AssetManager,
    allow_list: Arc<AllowList>,
}

impl CheckExecutor {
    /// Create an executor
    pub fn new(ctx: RuntimeContext, assets: AssetManager, allow_list: Arc<AllowList>) -> Self {
        Self {
            ctx,
            assets,
            allow_list,
        }
    }

    /// Execute a check and its matching hooks
    ///
    /// Only an invalid request is an error. Asset failures, allow-list
    /// denials and failing commands are reported through the event.
    pub async fn run_check(&self, request: CheckRequest) -> Result<Event, AgentError> {
        request.config.validate()?;
        let entity = self.ctx.entity.snapshot().await;
        let mut check = Check {
            config: request.config.clone(),
            issued: request.issued,
            ..Default::default()
        };
        let name = check.config.name.clone();

        let env = match self.provision(&check.config.runtime_assets, &request.assets).await {
            Ok(env) => env,
            Err(e) => {
                error!("Failed to provision assets for check {}: {}", name, e);
                check.status = FAILURE_STATUS;
                check.output = format!("failed to install runtime assets: {}", e);
                check.executed = unix_now();
                return Ok(self.event(entity, check));
            }
        };

        let authorization = self.allow_list.authorize(&check.config.command, env.get("PATH")).await;
        if !authorization.is_allowed() {
            warn!("Check {} denied by the allow list", name);
            check.status = FAILURE_STATUS;
            check.output = CHECK_DENIED_OUTPUT.to_string();
            check.executed = unix_now();
            return Ok(self.event(entity, check));
        }

        let vars = if authorization.env_enabled() {
            env.with_overrides(&check.config.env_vars)
        } else {
            env.vars().to_vec()
        };
        let stdin = if check.config.stdin {
            Some(stdin_payload(&entity, &check)?)
        } else {
            None
        };

        let result = command::execute(
            ExecutionRequest {
                command: check.config.command.clone(),
                env: vars,
                stdin,
                timeout: None,
            }
            .with_timeout_secs(check.config.timeout),
        )
        .await;

        check.status = result.status;
        check.executed = result.executed;
        check.duration = result.duration.as_secs_f64();
        check.output = self.shape_output(result.output, &check);
        info!("Check {} finished with status {} in {:.3}s", name, check.status, check.duration);

        let hooks = self.run_hooks(&request, &entity, &check).await;
        check.hooks = hooks;
        Ok(self.event(entity, check))
    }

    /// Resolve asset names against the request, install them, and return the environment
    async fn provision(&self, names: &[String], provided: &[Asset]) -> Result<Arc<Environment>, AssetError> {
        let required = names
            .iter()
            .map(|name| {
                provided
                    .iter()
                    .find(|asset| &asset.name == name)
                    .cloned()
                    .ok_or_else(|| AssetError::Unknown(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if !required.is_empty() {
            self.assets.merge(&required)?;
            self.assets.install_assets(&required).await?;
        }
        Ok(self.assets.env())
    }

    fn shape_output(&self, mut output: String, check: &Check) -> String {
        if check.config.discard_output {
            return String::new();
        }
        let limit = if check.config.max_output_size > 0 {
            check.config.max_output_size
        } else {
            self.ctx.config.max_output_size
        };
        truncate_output(&mut output, limit);
        output
    }

    async fn run_hooks(&self, request: &CheckRequest, entity: &Entity, check: &Check) -> Vec<Hook> {
        let mut results = Vec::new();
        for name in check.config.hooks_for_status(check.status) {
            let Some(config) = request.hooks.iter().find(|hook| hook.name == name) else {
                warn!("Hook {} of check {} is not defined", name, check.config.name);
                continue;
            };
            if let Err(e) = config.validate() {
                warn!("Skipping invalid hook {}: {}", name, e);
                continue;
            }
            results.push(self.run_hook(config.clone(), request, entity, check).await);
        }
        results
    }

    async fn run_hook(&self, config: HookConfig, request: &CheckRequest, entity: &Entity, check: &Check) -> Hook {
        debug!("Running hook {} for check {}", config.name, check.config.name);
        let mut hook = Hook {
            config,
            status: 0,
            output: String::new(),
            executed: 0,
            issued: check.issued,
            duration: 0.0,
        };

        let env = match self.provision(&hook.config.runtime_assets, &request.assets).await {
            Ok(env) => env,
            Err(e) => {
                error!("Failed to provision assets for hook {}: {}", hook.config.name, e);
                hook.status = FAILURE_STATUS;
                hook.output = format!("failed to install runtime assets: {}", e);
                hook.executed = unix_now();
                return hook;
            }
        };

        if !self.allow_list.authorize(&hook.config.command, env.get("PATH")).await.is_allowed() {
            warn!("Hook {} denied by the allow list", hook.config.name);
            hook.status = FAILURE_STATUS;
            hook.output = HOOK_DENIED_OUTPUT.to_string();
            hook.executed = unix_now();
            return hook;
        }

        let stdin = if hook.config.stdin {
            match stdin_payload(entity, check) {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!("Failed to encode stdin for hook {}: {}", hook.config.name, e);
                    None
                }
            }
        } else {
            None
        };

        let result = command::execute(
            ExecutionRequest {
                command: hook.config.command.clone(),
                env: env.vars().to_vec(),
                stdin,
                timeout: None,
            }
            .with_timeout_secs(hook.config.timeout),
        )
        .await;

        hook.status = result.status;
        hook.executed = result.executed;
        hook.duration = result.duration.as_secs_f64();
        hook.output = self.shape_output(result.output, check);
        hook
    }

    fn event(&self, entity: Entity, check: Check) -> Event {
        let mut event = Event::with_check(entity, check);
        event.fill_defaults(&self.ctx.config.namespace);
        event
    }
}

fn stdin_payload(entity: &Entity, check: &Check) -> Result<Vec<u8>, AgentError> {
    let payload = serde_json::to_vec(&StdinPayload { entity, check }).map_err(ProtocolError::from)?;
    Ok(payload)
}
