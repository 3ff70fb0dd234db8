use crate::chain::ChainClient;
use crate::contracts;
use crate::error::Result;
use crate::types::{EntryPointVersion, UserOperationV06, UserOperationV07, VersionedUserOp};
use ethers::types::{Address, Bytes, U256};
use rand::rngs::OsRng;
use rand::RngCore;

/// Counterfactual account address: the override when given, otherwise
/// `factory.getAddress(owner, "")`.
pub async fn resolve_account_address(
    chain: &dyn ChainClient,
    factory: Address,
    owner: Address,
    address_override: Option<Address>,
) -> Result<Address> {
    if let Some(addr) = address_override {
        return Ok(addr);
    }
    let out = chain
        .call(factory, contracts::factory_get_address(owner, &Bytes::new()))
        .await?;
    contracts::decode_address_output("getAddress", &out)
}

/// Factory deployment payload for an undeployed account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitCode {
    pub factory: Address,
    pub factory_data: Bytes,
}

impl InitCode {
    pub fn new(factory: Address, owner: Address) -> Self {
        Self {
            factory,
            factory_data: contracts::factory_create_account(owner, &Bytes::new()),
        }
    }

    /// v0.6 single-blob form: `factory ‖ factoryData`.
    pub fn packed(&self) -> Bytes {
        let mut v = Vec::with_capacity(20 + self.factory_data.len());
        v.extend_from_slice(self.factory.as_bytes());
        v.extend_from_slice(self.factory_data.as_ref());
        Bytes::from(v)
    }
}

/// Random 192-bit nonce key.
///
/// Operations drawn with different keys never wait on each other's nonce, so
/// there is no ordering between concurrently issued operations of one sender.
pub fn random_nonce_key() -> U256 {
    let mut key = [0u8; 24];
    OsRng.fill_bytes(&mut key);
    U256::from_big_endian(&key)
}

/// `entryPoint.getNonce(account, key)`: `key << 64 | sequence`.
pub async fn fetch_nonce(
    chain: &dyn ChainClient,
    entry_point: Address,
    account: Address,
    key: U256,
) -> Result<U256> {
    let out = chain
        .call(entry_point, contracts::entry_point_get_nonce(account, key))
        .await?;
    contracts::decode_u256_output("getNonce", &out)
}

/// Draft operation with sender, nonce, call data and (optionally) init code.
/// Gas, fees, paymaster fields and signature are filled in later.
pub fn draft_user_op(
    version: EntryPointVersion,
    sender: Address,
    nonce: U256,
    call_data: Bytes,
    init_code: Option<&InitCode>,
    signature: Bytes,
) -> VersionedUserOp {
    match version {
        EntryPointVersion::V06 => VersionedUserOp::V06(UserOperationV06 {
            sender,
            nonce,
            init_code: init_code.map(InitCode::packed).unwrap_or_default(),
            call_data,
            signature,
            ..Default::default()
        }),
        EntryPointVersion::V07 => VersionedUserOp::V07(UserOperationV07 {
            sender,
            nonce,
            factory: init_code.map(|i| i.factory),
            factory_data: init_code.map(|i| i.factory_data.clone()).unwrap_or_default(),
            call_data,
            signature,
            ..Default::default()
        }),
    }
}
