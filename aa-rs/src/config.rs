use crate::error::UsageError;
use crate::execution::AccountVariant;
use crate::types::EntryPointVersion;
use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, H160, U256};
use serde::Deserialize;
use std::{fs, path::Path, time::Duration};

/// 0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789
pub const ENTRY_POINT_V06: Address = H160([
    0x5f, 0xf1, 0x37, 0xd4, 0xb0, 0xfd, 0xcd, 0x49, 0xdc, 0xa3, 0x0c, 0x7c, 0xf5, 0x7e, 0x57,
    0x8a, 0x02, 0x6d, 0x27, 0x89,
]);
/// 0x0000000071727De22E5E9d8BAf0edAc6f37da032
pub const ENTRY_POINT_V07: Address = H160([
    0x00, 0x00, 0x00, 0x00, 0x71, 0x72, 0x7d, 0xe2, 0x2e, 0x5e, 0x9d, 0x8b, 0xaf, 0x0e, 0xda,
    0xc6, 0xf3, 0x7d, 0xa0, 0x32,
]);

/// 0x85e23b94e7F5E9cC1fF78BCe78cfb15B81f0DF00
pub const DEFAULT_FACTORY_V06: Address = H160([
    0x85, 0xe2, 0x3b, 0x94, 0xe7, 0xf5, 0xe9, 0xcc, 0x1f, 0xf7, 0x8b, 0xce, 0x78, 0xcf, 0xb1,
    0x5b, 0x81, 0xf0, 0xdf, 0x00,
]);
/// 0x4bE0ddfebcA9A5A4a617dee4DeCe99E7c862dceb
pub const DEFAULT_FACTORY_V07: Address = H160([
    0x4b, 0xe0, 0xdd, 0xfe, 0xbc, 0xa9, 0xa5, 0xa4, 0xa6, 0x17, 0xde, 0xe4, 0xde, 0xce, 0x99,
    0xe7, 0xc8, 0x62, 0xdc, 0xeb,
]);

/// `{chain_id}` is substituted with the decimal chain id.
pub const DEFAULT_BUNDLER_URL: &str = "https://{chain_id}.bundler.thirdweb.com/v2";
pub const DEFAULT_RPC_URL: &str = "https://{chain_id}.rpc.thirdweb.com";

pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// 65-byte placeholder signature used while the operation is estimated and
/// sponsored; shaped so signature recovery does not revert.
pub const DUMMY_SIGNATURE: &str = "0xfffffffffffffffffffffffffffffff0000000000000000000000000000000007aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1c";

/// Chains whose execution environment has native account abstraction and no
/// EntryPoint/bundler flow (zkSync Era and its forks).
pub const ALTERNATE_CHAIN_IDS: &[u64] = &[
    300, 302, 324, 282, 388, 2741, 4654, 11124, 37111, 333271, 978658, 4457845, 531050104,
];

pub fn is_alternate_chain(chain_id: u64, extra: &[u64]) -> bool {
    ALTERNATE_CHAIN_IDS.contains(&chain_id) || extra.contains(&chain_id)
}

pub fn url_for_chain(template: &str, chain_id: u64) -> String {
    template.replace("{chain_id}", &chain_id.to_string())
}

/// ERC-20 token paymaster binding. Chain specific.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Erc20PaymasterConfig {
    pub paymaster: Address,
    pub token: Address,
    /// Storage slot of the token's `balanceOf` mapping, used for simulation overrides.
    pub balance_storage_slot: U256,
}

#[derive(Clone, Debug)]
pub struct AccountConfig {
    pub chain_id: u64,
    pub entry_point_version: EntryPointVersion,
    pub factory: Address,
    pub account_address_override: Option<Address>,
    pub gasless: bool,
    pub bundler_url: Option<String>,
    pub paymaster_url: Option<String>,
    pub erc20_paymaster: Option<Erc20PaymasterConfig>,
    pub variant: AccountVariant,
    pub receipt_poll_interval: Duration,
    pub extra_alternate_chain_ids: Vec<u64>,
}

impl AccountConfig {
    /// Config using the default factory of `entry_point_version`.
    pub fn new(chain_id: u64, entry_point_version: EntryPointVersion) -> Self {
        Self {
            chain_id,
            entry_point_version,
            factory: entry_point_version.default_factory(),
            account_address_override: None,
            gasless: true,
            bundler_url: None,
            paymaster_url: None,
            erc20_paymaster: None,
            variant: AccountVariant::Simple,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
            extra_alternate_chain_ids: Vec::new(),
        }
    }

    pub fn with_factory(mut self, factory: Address) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_address_override(mut self, account: Address) -> Self {
        self.account_address_override = Some(account);
        self
    }

    pub fn with_gasless(mut self, gasless: bool) -> Self {
        self.gasless = gasless;
        self
    }

    pub fn with_bundler_url(mut self, url: impl Into<String>) -> Self {
        self.bundler_url = Some(url.into());
        self
    }

    pub fn with_paymaster_url(mut self, url: impl Into<String>) -> Self {
        self.paymaster_url = Some(url.into());
        self
    }

    pub fn with_erc20_paymaster(mut self, pm: Erc20PaymasterConfig) -> Self {
        self.erc20_paymaster = Some(pm);
        self
    }

    pub fn with_variant(mut self, variant: AccountVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point_version.entry_point()
    }

    pub fn is_alternate_chain(&self) -> bool {
        is_alternate_chain(self.chain_id, &self.extra_alternate_chain_ids)
    }

    /// Configured URLs may carry a `{chain_id}` placeholder so they survive a
    /// network switch.
    pub fn bundler_url(&self) -> String {
        url_for_chain(
            self.bundler_url.as_deref().unwrap_or(DEFAULT_BUNDLER_URL),
            self.chain_id,
        )
    }

    /// Paymaster URL; the bundler URL when none is configured.
    pub fn paymaster_url(&self) -> String {
        match self.paymaster_url.as_deref() {
            Some(url) => url_for_chain(url, self.chain_id),
            None => self.bundler_url(),
        }
    }

    /// Checks the preconditions that do not need a network round trip.
    pub fn validate(&self) -> Result<(), UsageError> {
        if self.chain_id == 0 {
            return Err(UsageError::InvalidChainId);
        }
        if self.factory.is_zero() && !self.is_alternate_chain() {
            return Err(UsageError::InvalidFactory);
        }
        if self.erc20_paymaster.is_some() && self.entry_point_version == EntryPointVersion::V06 {
            return Err(UsageError::Erc20PaymasterRequiresV07);
        }
        if self.receipt_poll_interval.is_zero() {
            return Err(UsageError::InvalidConfig(
                "receipt poll interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// On-disk account configuration (camelCase JSON).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountConfigRaw {
    pub chain_id: u64,
    #[serde(default)]
    pub entry_point_version: Option<EntryPointVersion>,
    #[serde(default)]
    pub factory: Option<String>,
    #[serde(default)]
    pub account_address: Option<String>,
    #[serde(default = "default_gasless")]
    pub gasless: bool,
    #[serde(default)]
    pub bundler_url: Option<String>,
    #[serde(default)]
    pub paymaster_url: Option<String>,
    #[serde(default)]
    pub erc20_paymaster: Option<Erc20PaymasterRaw>,
    #[serde(default)]
    pub modular: bool,
    #[serde(default)]
    pub receipt_poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub alternate_chain_ids: Vec<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Erc20PaymasterRaw {
    pub paymaster: String,
    pub token: String,
    pub balance_storage_slot: u64,
}

fn default_gasless() -> bool {
    true
}

impl AccountConfigRaw {
    pub fn into_config(self) -> Result<AccountConfig> {
        let version = self.entry_point_version.unwrap_or_default();
        let mut cfg = AccountConfig::new(self.chain_id, version);

        if let Some(f) = self.factory.as_deref() {
            cfg.factory = parse_addr(f).context("invalid factory address")?;
        }
        if let Some(a) = self.account_address.as_deref() {
            cfg.account_address_override =
                Some(parse_addr(a).context("invalid accountAddress")?);
        }
        cfg.gasless = self.gasless;
        cfg.bundler_url = self.bundler_url;
        cfg.paymaster_url = self.paymaster_url;
        if let Some(pm) = self.erc20_paymaster {
            cfg.erc20_paymaster = Some(Erc20PaymasterConfig {
                paymaster: parse_addr(&pm.paymaster).context("invalid erc20Paymaster.paymaster")?,
                token: parse_addr(&pm.token).context("invalid erc20Paymaster.token")?,
                balance_storage_slot: U256::from(pm.balance_storage_slot),
            });
        }
        if self.modular {
            cfg.variant = AccountVariant::Modular;
        }
        if let Some(ms) = self.receipt_poll_interval_ms {
            cfg.receipt_poll_interval = Duration::from_millis(ms);
        }
        cfg.extra_alternate_chain_ids = self.alternate_chain_ids;

        cfg.validate().map_err(|e| anyhow!("{e}"))?;
        Ok(cfg)
    }
}

pub fn load_account_config(path: &Path, chain_override: Option<u64>) -> Result<AccountConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read account config at {}", path.display()))?;
    let mut raw: AccountConfigRaw = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse account config at {}", path.display()))?;

    if let Some(chain_id) = chain_override {
        raw.chain_id = chain_id;
    }

    if raw
        .bundler_url
        .as_deref()
        .is_some_and(|u| u.contains("secretKey=") || u.contains("/v2/"))
    {
        tracing::warn!("bundler URL looks like it may contain an API key; prefer SMARTWALLET_AA_BUNDLER_URL");
    }

    raw.into_config()
}

fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}
