use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ERC-4337 EntryPoint release targeted by an account.
///
/// The two releases use different UserOperation layouts and different hashing inputs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryPointVersion {
    #[serde(rename = "0.6")]
    V06,
    #[default]
    #[serde(rename = "0.7")]
    V07,
}

impl EntryPointVersion {
    /// Canonical singleton address of this EntryPoint release.
    pub fn entry_point(self) -> Address {
        match self {
            EntryPointVersion::V06 => crate::config::ENTRY_POINT_V06,
            EntryPointVersion::V07 => crate::config::ENTRY_POINT_V07,
        }
    }

    /// Default account factory deployed for this EntryPoint release.
    pub fn default_factory(self) -> Address {
        match self {
            EntryPointVersion::V06 => crate::config::DEFAULT_FACTORY_V06,
            EntryPointVersion::V07 => crate::config::DEFAULT_FACTORY_V07,
        }
    }
}

impl fmt::Display for EntryPointVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryPointVersion::V06 => f.write_str("0.6"),
            EntryPointVersion::V07 => f.write_str("0.7"),
        }
    }
}

impl FromStr for EntryPointVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('v') {
            "0.6" | "06" => Ok(EntryPointVersion::V06),
            "0.7" | "07" => Ok(EntryPointVersion::V07),
            other => Err(format!("unknown EntryPoint version {other}")),
        }
    }
}

/// ERC-4337 UserOperation (EntryPoint v0.6 layout).
///
/// `init_code` is `factory ‖ factoryData` and is empty once the account is deployed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperationV06 {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

/// ERC-4337 UserOperation (EntryPoint v0.7 layout).
///
/// Init code is split into `factory`/`factory_data` and the paymaster block is structured.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperationV07 {
    pub sender: Address,
    pub nonce: U256,
    pub factory: Option<Address>,
    pub factory_data: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster: Option<Address>,
    pub paymaster_verification_gas_limit: U256,
    pub paymaster_post_op_gas_limit: U256,
    pub paymaster_data: Bytes,
    pub signature: Bytes,
}

/// A UserOperation tagged with the EntryPoint release it was built for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionedUserOp {
    V06(UserOperationV06),
    V07(UserOperationV07),
}

impl VersionedUserOp {
    pub fn version(&self) -> EntryPointVersion {
        match self {
            VersionedUserOp::V06(_) => EntryPointVersion::V06,
            VersionedUserOp::V07(_) => EntryPointVersion::V07,
        }
    }

    pub fn sender(&self) -> Address {
        match self {
            VersionedUserOp::V06(op) => op.sender,
            VersionedUserOp::V07(op) => op.sender,
        }
    }

    pub fn nonce(&self) -> U256 {
        match self {
            VersionedUserOp::V06(op) => op.nonce,
            VersionedUserOp::V07(op) => op.nonce,
        }
    }

    pub fn call_data(&self) -> &Bytes {
        match self {
            VersionedUserOp::V06(op) => &op.call_data,
            VersionedUserOp::V07(op) => &op.call_data,
        }
    }

    pub fn signature(&self) -> &Bytes {
        match self {
            VersionedUserOp::V06(op) => &op.signature,
            VersionedUserOp::V07(op) => &op.signature,
        }
    }

    pub fn set_signature(&mut self, signature: Bytes) {
        match self {
            VersionedUserOp::V06(op) => op.signature = signature,
            VersionedUserOp::V07(op) => op.signature = signature,
        }
    }

    /// True when the operation carries factory deployment data.
    pub fn has_init_code(&self) -> bool {
        match self {
            VersionedUserOp::V06(op) => !op.init_code.is_empty(),
            VersionedUserOp::V07(op) => op.factory.is_some(),
        }
    }

    pub fn set_fees(&mut self, fees: &FeeSuggestion) {
        match self {
            VersionedUserOp::V06(op) => {
                op.max_fee_per_gas = fees.max_fee_per_gas;
                op.max_priority_fee_per_gas = fees.max_priority_fee_per_gas;
            }
            VersionedUserOp::V07(op) => {
                op.max_fee_per_gas = fees.max_fee_per_gas;
                op.max_priority_fee_per_gas = fees.max_priority_fee_per_gas;
            }
        }
    }

    /// Writes gas limits. Paymaster limits only exist in the v0.7 layout and are
    /// left untouched when the estimate does not carry them.
    pub fn set_gas(&mut self, gas: &GasEstimates) {
        match self {
            VersionedUserOp::V06(op) => {
                op.call_gas_limit = gas.call_gas_limit;
                op.verification_gas_limit = gas.verification_gas_limit;
                op.pre_verification_gas = gas.pre_verification_gas;
            }
            VersionedUserOp::V07(op) => {
                op.call_gas_limit = gas.call_gas_limit;
                op.verification_gas_limit = gas.verification_gas_limit;
                op.pre_verification_gas = gas.pre_verification_gas;
                if let Some(v) = gas.paymaster_verification_gas_limit {
                    op.paymaster_verification_gas_limit = v;
                }
                if let Some(v) = gas.paymaster_post_op_gas_limit {
                    op.paymaster_post_op_gas_limit = v;
                }
            }
        }
    }

    pub fn raise_call_gas_limit(&mut self, floor: U256) {
        let limit = match self {
            VersionedUserOp::V06(op) => &mut op.call_gas_limit,
            VersionedUserOp::V07(op) => &mut op.call_gas_limit,
        };
        if *limit < floor {
            *limit = floor;
        }
    }

    pub fn set_paymaster(&mut self, sponsorship: &PaymasterSponsorship) {
        match self {
            VersionedUserOp::V06(op) => {
                op.paymaster_and_data = sponsorship.paymaster_and_data_v06();
            }
            VersionedUserOp::V07(op) => {
                op.paymaster = sponsorship.paymaster;
                op.paymaster_data = sponsorship.paymaster_data.clone();
            }
        }
    }
}

/// Canonical ABI form consumed by `EntryPoint.getUserOpHash` (v0.7).
///
/// Gas limits and fees are each two big-endian `uint128` packed into one word.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackedUserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub account_gas_limits: [u8; 32],
    pub pre_verification_gas: U256,
    pub gas_fees: [u8; 32],
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeeSuggestion {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GasEstimates {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub paymaster_verification_gas_limit: Option<U256>,
    pub paymaster_post_op_gas_limit: Option<U256>,
}

/// Result of paymaster negotiation.
///
/// `gas` is populated only when the paymaster already priced the operation; otherwise
/// the estimator has to simulate it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaymasterSponsorship {
    pub paymaster: Option<Address>,
    pub paymaster_data: Bytes,
    /// v0.6 single-blob form, when the paymaster returned one directly.
    pub paymaster_and_data: Option<Bytes>,
    pub gas: Option<GasEstimates>,
}

impl PaymasterSponsorship {
    pub fn paymaster_and_data_v06(&self) -> Bytes {
        if let Some(blob) = &self.paymaster_and_data {
            return blob.clone();
        }
        match self.paymaster {
            Some(pm) => {
                let mut v = Vec::with_capacity(20 + self.paymaster_data.len());
                v.extend_from_slice(pm.as_bytes());
                v.extend_from_slice(self.paymaster_data.as_ref());
                Bytes::from(v)
            }
            None => Bytes::new(),
        }
    }
}

/// One call executed by the smart account.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Call {
    pub target: Address,
    pub value: U256,
    pub data: Bytes,
}

impl Call {
    pub fn new(target: Address, value: U256, data: Bytes) -> Self {
        Self {
            target,
            value,
            data,
        }
    }
}

/// A caller's transaction intent, before it is turned into a UserOperation
/// (or an alternate-chain transaction).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionInput {
    pub chain_id: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    pub gas: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

impl TransactionInput {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            ..Default::default()
        }
    }

    pub fn to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn data(mut self, data: Bytes) -> Self {
        self.data = data;
        self
    }

    pub fn gas(mut self, gas: U256) -> Self {
        self.gas = Some(gas);
        self
    }
}

/// Receipt returned by `eth_getUserOperationReceipt`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub success: bool,
    pub receipt: TransactionReceipt,
}
