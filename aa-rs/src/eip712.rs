//! EIP-712 payloads signed by the personal signer.

use ethers::abi::{self, Token};
use ethers::types::transaction::eip712::{EIP712Domain, Eip712};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use ethers::utils::rlp::RlpStream;
use std::convert::Infallible;

pub const ACCOUNT_DOMAIN_NAME: &str = "Account";
pub const ACCOUNT_DOMAIN_VERSION: &str = "1";

pub const ACCOUNT_MESSAGE_TYPE: &str = "AccountMessage(bytes message)";

pub const SIGNER_PERMISSION_REQUEST_TYPE: &str = "SignerPermissionRequest(address signer,uint8 isAdmin,address[] approvedTargets,uint256 nativeTokenLimitPerTransaction,uint128 permissionStartTimestamp,uint128 permissionEndTimestamp,uint128 reqValidityStartTimestamp,uint128 reqValidityEndTimestamp,bytes32 uid)";

pub const ZKSYNC_DOMAIN_NAME: &str = "zkSync";
pub const ZKSYNC_DOMAIN_VERSION: &str = "2";
pub const ZKSYNC_TRANSACTION_TYPE: &str = "Transaction(uint256 txType,uint256 from,uint256 to,uint256 gasLimit,uint256 gasPerPubdataByteLimit,uint256 maxFeePerGas,uint256 maxPriorityFeePerGas,uint256 paymaster,uint256 nonce,uint256 value,bytes data,bytes32[] factoryDeps,bytes paymasterInput)";

/// EIP-712 transaction type of zkSync native account-abstraction transactions.
pub const ZKSYNC_TX_TYPE: u64 = 0x71;
pub const DEFAULT_GAS_PER_PUBDATA_BYTE_LIMIT: u64 = 50_000;

/// `{name: "Account", version: "1", chainId, verifyingContract: account}`
pub fn account_domain(account: Address, chain_id: u64) -> EIP712Domain {
    EIP712Domain {
        name: Some(ACCOUNT_DOMAIN_NAME.to_string()),
        version: Some(ACCOUNT_DOMAIN_VERSION.to_string()),
        chain_id: Some(U256::from(chain_id)),
        verifying_contract: Some(account),
        salt: None,
    }
}

/// `keccak256(0x19 ‖ 0x01 ‖ domainSeparator ‖ structHash)`
pub fn typed_data_digest(domain: &EIP712Domain, struct_hash: [u8; 32]) -> H256 {
    let mut preimage = Vec::with_capacity(66);
    preimage.extend_from_slice(&[0x19, 0x01]);
    preimage.extend_from_slice(&domain.separator());
    preimage.extend_from_slice(&struct_hash);
    H256::from(keccak256(preimage))
}

/// The wrapper a smart account verifies in `isValidSignature`: the original
/// 32-byte hash re-signed under the account's own domain, so a signature for
/// one account cannot be replayed against another owned by the same key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountMessage {
    pub account: Address,
    pub chain_id: u64,
    pub message: H256,
}

impl AccountMessage {
    pub fn new(account: Address, chain_id: u64, message: H256) -> Self {
        Self {
            account,
            chain_id,
            message,
        }
    }

    pub fn digest(&self) -> H256 {
        match self.encode_eip712() {
            Ok(d) => H256::from(d),
            Err(never) => match never {},
        }
    }
}

impl Eip712 for AccountMessage {
    type Error = Infallible;

    fn domain(&self) -> Result<EIP712Domain, Self::Error> {
        Ok(account_domain(self.account, self.chain_id))
    }

    fn type_hash() -> Result<[u8; 32], Self::Error> {
        Ok(keccak256(ACCOUNT_MESSAGE_TYPE))
    }

    fn struct_hash(&self) -> Result<[u8; 32], Self::Error> {
        let encoded = abi::encode(&[Token::FixedBytes(self.message.as_bytes().to_vec())]);
        Ok(keccak256(abi::encode(&[
            Token::FixedBytes(Self::type_hash()?.to_vec()),
            Token::FixedBytes(keccak256(encoded).to_vec()),
        ])))
    }
}

/// Admin flag of a [`SignerPermissionRequest`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum AdminAction {
    #[default]
    None = 0,
    Grant = 1,
    Revoke = 2,
}

/// Capability grant consumed by `setPermissionsForSigner`. `uid` is single-use.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignerPermissionRequest {
    pub signer: Address,
    pub is_admin: AdminAction,
    pub approved_targets: Vec<Address>,
    pub native_token_limit_per_transaction: U256,
    pub permission_start_timestamp: u128,
    pub permission_end_timestamp: u128,
    pub req_validity_start_timestamp: u128,
    pub req_validity_end_timestamp: u128,
    pub uid: H256,
}

impl SignerPermissionRequest {
    pub fn type_hash() -> [u8; 32] {
        keccak256(SIGNER_PERMISSION_REQUEST_TYPE)
    }

    pub fn struct_hash(&self) -> [u8; 32] {
        let mut targets = Vec::with_capacity(self.approved_targets.len() * 32);
        for t in &self.approved_targets {
            targets.extend_from_slice(&abi::encode(&[Token::Address(*t)]));
        }
        keccak256(abi::encode(&[
            Token::FixedBytes(Self::type_hash().to_vec()),
            Token::Address(self.signer),
            Token::Uint(U256::from(self.is_admin as u8)),
            Token::FixedBytes(keccak256(targets).to_vec()),
            Token::Uint(self.native_token_limit_per_transaction),
            Token::Uint(U256::from(self.permission_start_timestamp)),
            Token::Uint(U256::from(self.permission_end_timestamp)),
            Token::Uint(U256::from(self.req_validity_start_timestamp)),
            Token::Uint(U256::from(self.req_validity_end_timestamp)),
            Token::FixedBytes(self.uid.as_bytes().to_vec()),
        ]))
    }

    /// Digest signed by the account owner; `account` is the verifying contract.
    pub fn digest(&self, account: Address, chain_id: u64) -> H256 {
        typed_data_digest(&account_domain(account, chain_id), self.struct_hash())
    }

    /// ABI tuple passed to `setPermissionsForSigner`.
    pub fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.signer),
            Token::Uint(U256::from(self.is_admin as u8)),
            Token::Array(
                self.approved_targets
                    .iter()
                    .map(|t| Token::Address(*t))
                    .collect(),
            ),
            Token::Uint(self.native_token_limit_per_transaction),
            Token::Uint(U256::from(self.permission_start_timestamp)),
            Token::Uint(U256::from(self.permission_end_timestamp)),
            Token::Uint(U256::from(self.req_validity_start_timestamp)),
            Token::Uint(U256::from(self.req_validity_end_timestamp)),
            Token::FixedBytes(self.uid.as_bytes().to_vec()),
        ])
    }
}

/// zkSync EIP-712 transaction (type `0x71`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZkSyncTransaction {
    pub chain_id: u64,
    pub from: Address,
    pub to: Address,
    pub gas_limit: U256,
    pub gas_per_pubdata_byte_limit: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    /// Zero when unsponsored.
    pub paymaster: Address,
    pub nonce: U256,
    pub value: U256,
    pub data: Bytes,
    pub factory_deps: Vec<H256>,
    pub paymaster_input: Bytes,
}

impl ZkSyncTransaction {
    pub fn digest(&self) -> H256 {
        match self.encode_eip712() {
            Ok(d) => H256::from(d),
            Err(never) => match never {},
        }
    }

    /// Signed `0x71` envelope: the type byte followed by the RLP list
    /// `[nonce, maxPriorityFeePerGas, maxFeePerGas, gasLimit, to, value, data,
    /// yParity, r, s, chainId, from, gasPerPubdata, factoryDeps,
    /// customSignature, paymasterParams]`.
    ///
    /// A signature that is not a 65-byte ECDSA signature travels only as the
    /// custom signature; the ECDSA slots then hold `chainId, "", ""`.
    pub fn rlp_signed(&self, signature: &Bytes) -> Bytes {
        let mut rlp = RlpStream::new_list(16);
        rlp.append(&self.nonce);
        rlp.append(&self.max_priority_fee_per_gas);
        rlp.append(&self.max_fee_per_gas);
        rlp.append(&self.gas_limit);
        rlp.append(&self.to);
        rlp.append(&self.value);
        rlp.append(&self.data.as_ref());
        if signature.len() == 65 {
            let v = signature[64];
            rlp.append(&if v >= 27 { v - 27 } else { v });
            rlp.append(&U256::from_big_endian(&signature[..32]));
            rlp.append(&U256::from_big_endian(&signature[32..64]));
        } else {
            rlp.append(&self.chain_id);
            rlp.append_empty_data();
            rlp.append_empty_data();
        }
        rlp.append(&self.chain_id);
        rlp.append(&self.from);
        rlp.append(&self.gas_per_pubdata_byte_limit);
        rlp.append_list::<H256, H256>(&self.factory_deps);
        rlp.append(&signature.as_ref());
        if self.paymaster.is_zero() {
            rlp.begin_list(0);
        } else {
            rlp.begin_list(2);
            rlp.append(&self.paymaster);
            rlp.append(&self.paymaster_input.as_ref());
        }

        let mut out = vec![ZKSYNC_TX_TYPE as u8];
        out.extend_from_slice(&rlp.out());
        Bytes::from(out)
    }
}

impl Eip712 for ZkSyncTransaction {
    type Error = Infallible;

    fn domain(&self) -> Result<EIP712Domain, Self::Error> {
        Ok(EIP712Domain {
            name: Some(ZKSYNC_DOMAIN_NAME.to_string()),
            version: Some(ZKSYNC_DOMAIN_VERSION.to_string()),
            chain_id: Some(U256::from(self.chain_id)),
            verifying_contract: None,
            salt: None,
        })
    }

    fn type_hash() -> Result<[u8; 32], Self::Error> {
        Ok(keccak256(ZKSYNC_TRANSACTION_TYPE))
    }

    fn struct_hash(&self) -> Result<[u8; 32], Self::Error> {
        let deps: Vec<u8> = self
            .factory_deps
            .iter()
            .flat_map(|h| h.as_bytes().to_vec())
            .collect();
        Ok(keccak256(abi::encode(&[
            Token::FixedBytes(Self::type_hash()?.to_vec()),
            Token::Uint(U256::from(ZKSYNC_TX_TYPE)),
            Token::Address(self.from),
            Token::Address(self.to),
            Token::Uint(self.gas_limit),
            Token::Uint(self.gas_per_pubdata_byte_limit),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::Address(self.paymaster),
            Token::Uint(self.nonce),
            Token::Uint(self.value),
            Token::FixedBytes(keccak256(self.data.as_ref()).to_vec()),
            Token::FixedBytes(keccak256(deps).to_vec()),
            Token::FixedBytes(keccak256(self.paymaster_input.as_ref()).to_vec()),
        ])))
    }
}
