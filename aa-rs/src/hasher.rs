use crate::chain::ChainClient;
use crate::contracts;
use crate::encoding::{fmt_h256, pack_u128_pair, u256_to_u128};
use crate::error::{Result, UsageError};
use crate::signer::PersonalSigner;
use crate::types::{PackedUserOperation, UserOperationV06, UserOperationV07, VersionedUserOp};
use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;

fn narrow(field: &'static str, v: U256) -> Result<u128, UsageError> {
    u256_to_u128(v).ok_or(UsageError::ValueOverflow { field })
}

/// Packs a v0.7 operation into the form `EntryPoint.getUserOpHash` takes.
pub fn pack_v07(op: &UserOperationV07) -> Result<PackedUserOperation, UsageError> {
    let init_code = match op.factory {
        Some(factory) => {
            let mut v = factory.as_bytes().to_vec();
            v.extend_from_slice(op.factory_data.as_ref());
            Bytes::from(v)
        }
        None => Bytes::new(),
    };

    let paymaster_and_data = match op.paymaster {
        Some(pm) => {
            let mut v = Vec::with_capacity(52 + op.paymaster_data.len());
            v.extend_from_slice(pm.as_bytes());
            v.extend_from_slice(
                &narrow(
                    "paymasterVerificationGasLimit",
                    op.paymaster_verification_gas_limit,
                )?
                .to_be_bytes(),
            );
            v.extend_from_slice(
                &narrow("paymasterPostOpGasLimit", op.paymaster_post_op_gas_limit)?.to_be_bytes(),
            );
            v.extend_from_slice(op.paymaster_data.as_ref());
            Bytes::from(v)
        }
        None => Bytes::new(),
    };

    Ok(PackedUserOperation {
        sender: op.sender,
        nonce: op.nonce,
        init_code,
        call_data: op.call_data.clone(),
        account_gas_limits: pack_u128_pair(
            narrow("verificationGasLimit", op.verification_gas_limit)?,
            narrow("callGasLimit", op.call_gas_limit)?,
        ),
        pre_verification_gas: op.pre_verification_gas,
        gas_fees: pack_u128_pair(
            narrow("maxPriorityFeePerGas", op.max_priority_fee_per_gas)?,
            narrow("maxFeePerGas", op.max_fee_per_gas)?,
        ),
        paymaster_and_data,
        signature: op.signature.clone(),
    })
}

/// Same projection for a v0.6 operation. Only used for diagnostics: the v0.6
/// EntryPoint hashes its own struct layout.
pub fn pack_v06(op: &UserOperationV06) -> Result<PackedUserOperation, UsageError> {
    Ok(PackedUserOperation {
        sender: op.sender,
        nonce: op.nonce,
        init_code: op.init_code.clone(),
        call_data: op.call_data.clone(),
        account_gas_limits: pack_u128_pair(
            narrow("verificationGasLimit", op.verification_gas_limit)?,
            narrow("callGasLimit", op.call_gas_limit)?,
        ),
        pre_verification_gas: op.pre_verification_gas,
        gas_fees: pack_u128_pair(
            narrow("maxPriorityFeePerGas", op.max_priority_fee_per_gas)?,
            narrow("maxFeePerGas", op.max_fee_per_gas)?,
        ),
        paymaster_and_data: op.paymaster_and_data.clone(),
        signature: op.signature.clone(),
    })
}

fn hashed(b: &Bytes) -> Token {
    Token::FixedBytes(keccak256(b.as_ref()).to_vec())
}

fn finish(inner: [u8; 32], entry_point: Address, chain_id: u64) -> H256 {
    H256::from(keccak256(abi::encode(&[
        Token::FixedBytes(inner.to_vec()),
        Token::Address(entry_point),
        Token::Uint(U256::from(chain_id)),
    ])))
}

/// `EntryPoint(v0.6).getUserOpHash` computed locally.
pub fn user_op_v06_hash(op: &UserOperationV06, entry_point: Address, chain_id: u64) -> H256 {
    let inner = keccak256(abi::encode(&[
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        hashed(&op.init_code),
        hashed(&op.call_data),
        Token::Uint(op.call_gas_limit),
        Token::Uint(op.verification_gas_limit),
        Token::Uint(op.pre_verification_gas),
        Token::Uint(op.max_fee_per_gas),
        Token::Uint(op.max_priority_fee_per_gas),
        hashed(&op.paymaster_and_data),
    ]));
    finish(inner, entry_point, chain_id)
}

/// `EntryPoint(v0.7).getUserOpHash` computed locally.
pub fn packed_user_op_hash(op: &PackedUserOperation, entry_point: Address, chain_id: u64) -> H256 {
    let inner = keccak256(abi::encode(&[
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        hashed(&op.init_code),
        hashed(&op.call_data),
        Token::FixedBytes(op.account_gas_limits.to_vec()),
        Token::Uint(op.pre_verification_gas),
        Token::FixedBytes(op.gas_fees.to_vec()),
        hashed(&op.paymaster_and_data),
    ]));
    finish(inner, entry_point, chain_id)
}

impl VersionedUserOp {
    /// Canonical packed projection; v0.6 fields are mapped one to one.
    pub fn pack(&self) -> Result<PackedUserOperation, UsageError> {
        match self {
            VersionedUserOp::V06(op) => pack_v06(op),
            VersionedUserOp::V07(op) => pack_v07(op),
        }
    }

    /// The hash the EntryPoint would return, computed offline.
    pub fn local_hash(&self, entry_point: Address, chain_id: u64) -> Result<H256, UsageError> {
        match self {
            VersionedUserOp::V06(op) => Ok(user_op_v06_hash(op, entry_point, chain_id)),
            VersionedUserOp::V07(op) => Ok(packed_user_op_hash(&pack_v07(op)?, entry_point, chain_id)),
        }
    }
}

/// Asks the EntryPoint for the operation hash.
pub async fn user_op_hash(
    chain: &dyn ChainClient,
    entry_point: Address,
    op: &VersionedUserOp,
) -> Result<H256> {
    let data = match op {
        VersionedUserOp::V06(op) => contracts::entry_point_get_user_op_hash_v06(op),
        VersionedUserOp::V07(op) => contracts::entry_point_get_user_op_hash_v07(&pack_v07(op)?),
    };
    let out = chain.call(entry_point, data).await?;
    contracts::decode_bytes32_output("getUserOpHash", &out)
}

/// Signs an operation hash with the personal signer.
///
/// A key signs the 32 raw bytes (EIP-191 prefixed by the signer). A contract
/// signer signs the `0x`-prefixed hex string of the hash instead.
pub async fn sign_user_op_hash(signer: &dyn PersonalSigner, hash: H256) -> Result<Bytes> {
    if signer.is_contract_signer() {
        signer.personal_sign(fmt_h256(hash).as_bytes()).await
    } else {
        signer.personal_sign(hash.as_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::unpack_u128_pair;
    use crate::types::EntryPointVersion;

    fn sample_v07() -> UserOperationV07 {
        UserOperationV07 {
            sender: Address::repeat_byte(0x11),
            nonce: U256::from(7) << 64,
            call_data: Bytes::from(vec![0xb6, 0x1d, 0x27, 0xf6]),
            call_gas_limit: U256::from(100_000),
            verification_gas_limit: U256::from(250_000),
            pre_verification_gas: U256::from(50_000),
            max_fee_per_gas: U256::from(2_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            ..Default::default()
        }
    }

    #[test]
    fn packed_gas_words_unpack_to_fields() {
        let packed = pack_v07(&sample_v07()).unwrap();
        assert_eq!(unpack_u128_pair(&packed.account_gas_limits), (250_000, 100_000));
        assert_eq!(
            unpack_u128_pair(&packed.gas_fees),
            (1_000_000_000, 2_000_000_000)
        );
        assert!(packed.init_code.is_empty());
        assert!(packed.paymaster_and_data.is_empty());
    }

    #[test]
    fn packed_init_code_and_paymaster_blob_layout() {
        let op = UserOperationV07 {
            factory: Some(Address::repeat_byte(0xfa)),
            factory_data: Bytes::from(vec![1, 2, 3]),
            paymaster: Some(Address::repeat_byte(0xbb)),
            paymaster_verification_gas_limit: U256::from(0x10),
            paymaster_post_op_gas_limit: U256::from(0x20),
            paymaster_data: Bytes::from(vec![0xcc; 5]),
            ..sample_v07()
        };
        let packed = pack_v07(&op).unwrap();
        assert_eq!(&packed.init_code[..20], Address::repeat_byte(0xfa).as_bytes());
        assert_eq!(&packed.init_code[20..], &[1, 2, 3]);

        let pmd = &packed.paymaster_and_data;
        assert_eq!(pmd.len(), 20 + 16 + 16 + 5);
        assert_eq!(&pmd[..20], Address::repeat_byte(0xbb).as_bytes());
        assert_eq!(pmd[35], 0x10);
        assert_eq!(pmd[51], 0x20);
        assert_eq!(&pmd[52..], &[0xcc; 5]);
    }

    #[test]
    fn oversized_gas_is_rejected() {
        let op = UserOperationV07 {
            call_gas_limit: U256::from(u128::MAX) + 1,
            ..sample_v07()
        };
        assert_eq!(
            pack_v07(&op),
            Err(UsageError::ValueOverflow {
                field: "callGasLimit"
            })
        );
    }

    #[test]
    fn hash_ignores_signature_and_binds_chain() {
        let ep = EntryPointVersion::V07.entry_point();
        let op = VersionedUserOp::V07(sample_v07());
        let mut signed = op.clone();
        signed.set_signature(Bytes::from(vec![1u8; 65]));
        assert_eq!(op.local_hash(ep, 1).unwrap(), signed.local_hash(ep, 1).unwrap());
        assert_ne!(op.local_hash(ep, 1).unwrap(), op.local_hash(ep, 10).unwrap());
    }

    #[test]
    fn v06_hash_covers_init_code() {
        let ep = EntryPointVersion::V06.entry_point();
        let base = UserOperationV06 {
            sender: Address::repeat_byte(0x11),
            ..Default::default()
        };
        let with_init = UserOperationV06 {
            init_code: Bytes::from(vec![0xfa; 24]),
            ..base.clone()
        };
        assert_ne!(
            user_op_v06_hash(&base, ep, 1),
            user_op_v06_hash(&with_init, ep, 1)
        );
    }

    #[test]
    fn v06_projection_keeps_paymaster_blob() {
        let op = VersionedUserOp::V06(UserOperationV06 {
            paymaster_and_data: Bytes::from(vec![9u8; 30]),
            ..Default::default()
        });
        assert_eq!(op.pack().unwrap().paymaster_and_data.len(), 30);
    }
}
