use crate::bundler::BundlerClient;
use crate::encoding::user_op_to_json;
use crate::error::Result;
use crate::types::{FeeSuggestion, GasEstimates, VersionedUserOp};
use ethers::providers::spoof;
use ethers::types::Address;

/// Writes fee caps: the caller's when given, otherwise the bundler's suggestion.
pub async fn apply_fees(
    bundler: &BundlerClient,
    op: &mut VersionedUserOp,
    fees: Option<&FeeSuggestion>,
) -> Result<()> {
    let fees = match fees {
        Some(f) => f.clone(),
        None => bundler.get_user_operation_gas_price().await?,
    };
    tracing::debug!(
        max_fee_per_gas = %fees.max_fee_per_gas,
        max_priority_fee_per_gas = %fees.max_priority_fee_per_gas,
        "user operation fees"
    );
    op.set_fees(&fees);
    Ok(())
}

/// Writes gas limits: the sponsor's when it priced the operation, otherwise a
/// bundler estimate. Estimation errors propagate; limits are never zeroed.
pub async fn apply_gas_limits(
    bundler: &BundlerClient,
    entry_point: Address,
    op: &mut VersionedUserOp,
    sponsored: Option<&GasEstimates>,
    state_override: Option<&spoof::State>,
) -> Result<()> {
    let gas = match sponsored {
        Some(g) => g.clone(),
        None => {
            bundler
                .estimate_user_operation_gas(user_op_to_json(op), entry_point, state_override)
                .await?
        }
    };
    tracing::debug!(
        call_gas_limit = %gas.call_gas_limit,
        verification_gas_limit = %gas.verification_gas_limit,
        pre_verification_gas = %gas.pre_verification_gas,
        sponsored = sponsored.is_some(),
        "user operation gas"
    );
    op.set_gas(&gas);
    Ok(())
}
