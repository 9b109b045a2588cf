//! Text shown to subscribers.

use balance::BalanceSnapshot;
use config::TargetConfig;
use notifier::{ActionButton, NotificationPayload};
use subscription::Subscription;

/// Callback prefix asking the bot to re-fetch a target's balance.
pub const REFRESH_CALLBACK: &str = "refresh";
/// Callback prefix asking the bot to disable the alert for a target.
pub const DISABLE_CALLBACK: &str = "disable";

fn callback(action: &str, target: &TargetConfig) -> String {
    format!("{action}:{}", target.name)
}

/// Alert sent when a balance drops below a subscriber's threshold.
pub fn low_balance_alert(
    target: &TargetConfig,
    snapshot: &BalanceSnapshot,
    threshold: &str,
) -> NotificationPayload {
    let text = format!(
        "⚠️ Low balance: {label}\n\n\
         Balance: {balance} {symbol}\n\
         Alert threshold: {threshold} {symbol}\n\
         Wallet: {wallet}\n\
         Checked at: {at}",
        label = target.label(),
        balance = snapshot.formatted,
        symbol = snapshot.symbol,
        wallet = snapshot.wallet,
        at = snapshot.fetched_at.format("%Y-%m-%d %H:%M:%S UTC"),
    );

    NotificationPayload::WithActions {
        text,
        buttons: vec![
            ActionButton::new("🔄 Refresh", callback(REFRESH_CALLBACK, target)),
            ActionButton::new("🔕 Disable alert", callback(DISABLE_CALLBACK, target)),
        ],
    }
}

/// On-demand balance report.
pub fn balance_report(target: &TargetConfig, snapshot: &BalanceSnapshot) -> NotificationPayload {
    let text = format!(
        "💰 {label}\n\nBalance: {balance} {symbol}\nWallet: {wallet}",
        label = target.label(),
        balance = snapshot.formatted,
        symbol = snapshot.symbol,
        wallet = snapshot.wallet,
    );

    NotificationPayload::WithActions {
        text,
        buttons: vec![ActionButton::new(
            "🔄 Refresh",
            callback(REFRESH_CALLBACK, target),
        )],
    }
}

/// Current reminder settings of a subscriber.
pub fn reminder_status(target: &TargetConfig, subscription: Option<&Subscription>) -> String {
    let Some(sub) = subscription.filter(|s| s.is_active) else {
        return format!("No active balance alert for {}.", target.label());
    };

    let last_checked = sub
        .last_checked_at
        .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M UTC").to_string());
    let last_balance = sub.last_balance.as_deref().unwrap_or("unknown");

    format!(
        "🔔 Balance alert for {label}\n\n\
         Threshold: {threshold} {symbol}\n\
         Check every: {interval} min\n\
         Last checked: {last_checked}\n\
         Last balance: {last_balance} {symbol}\n\
         Alerts sent: {count}",
        label = target.label(),
        threshold = sub.threshold,
        symbol = target.symbol,
        interval = sub.check_interval_minutes,
        count = sub.alert_count,
    )
}
