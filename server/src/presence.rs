//! Online/offline transitions and the daily reward tied to coming online.

use chrono::Utc;

use crate::error::StoreError;
use crate::players::DailyReward;
use crate::state::AppState;

/// Mark the player online and redeem their daily reward if it is due.
pub async fn go_online(state: &AppState, user_id: &str) -> Result<Option<DailyReward>, StoreError> {
    state.players.set_presence(user_id, true).await?;

    let reward = state
        .players
        .redeem_daily_reward(user_id, Utc::now().timestamp(), state.daily_reward)
        .await?;

    match reward {
        Some(DailyReward::Granted { amount, balance }) => {
            tracing::info!(user_id = %user_id, amount, balance, "Daily reward granted");
        }
        Some(DailyReward::AlreadyRedeemed { next_eligible_at }) => {
            tracing::debug!(user_id = %user_id, next_eligible_at, "Daily reward already redeemed");
        }
        None => {}
    }
    Ok(reward)
}

pub async fn go_offline(state: &AppState, user_id: &str) -> Result<(), StoreError> {
    state.players.set_presence(user_id, false).await
}

/// Screen message shown to V2 clients when a reward was granted.
pub fn reward_message(reward: &DailyReward) -> Option<String> {
    match reward {
        DailyReward::Granted { amount, balance } => Some(format!(
            "Daily reward: +{amount} credits (balance {balance})"
        )),
        DailyReward::AlreadyRedeemed { .. } => None,
    }
}
