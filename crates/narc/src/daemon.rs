// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires the configured streams to a single dispatch service and supervises
//! them until shutdown or the first fatal condition.

use crate::client::DeliveryClient;
use crate::config::Config;
use crate::dispatch::DispatchService;
use crate::errors::Fatal;
use crate::stream::Stream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct Daemon {
    config: Config,
}

impl Daemon {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Daemon { config }
    }

    /// Runs every stream and the dispatch service until `cancel_token` fires.
    ///
    /// The first fatal error cancels everything else and is returned once
    /// the remaining tasks have wound down.
    pub async fn run(self, cancel_token: CancellationToken) -> Result<(), Fatal> {
        let client = DeliveryClient::new(&self.config).await?;
        let (service, dispatch) = DispatchService::new(&self.config, client, cancel_token.clone());

        let mut tasks = JoinSet::new();
        tasks.spawn(service.run());
        for stream_config in &self.config.streams {
            let stream = Stream::new(stream_config, &self.config);
            tasks.spawn(stream.run(dispatch.clone(), cancel_token.clone()));
        }

        info!("Waiting for events on {} files", self.config.streams.len());

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(fatal)) => {
                    debug!("Stopping after fatal error: {}", fatal);
                    cancel_token.cancel();
                    if result.is_ok() {
                        result = Err(fatal);
                    }
                }
                Err(e) => error!("Task failed: {}", e),
            }
        }

        debug!("All streams stopped");
        result
    }
}
