//! Terminal trade return codes (MT5 `TRADE_RETCODE_*` numbering)

use crate::models::RejectionClass;

pub const REQUOTE: u32 = 10004;
pub const REJECT: u32 = 10006;
pub const CANCEL: u32 = 10007;
pub const PLACED: u32 = 10008;
pub const DONE: u32 = 10009;
pub const DONE_PARTIAL: u32 = 10010;
pub const ERROR: u32 = 10011;
pub const TIMEOUT: u32 = 10012;
pub const INVALID: u32 = 10013;
pub const INVALID_VOLUME: u32 = 10014;
pub const INVALID_PRICE: u32 = 10015;
pub const INVALID_STOPS: u32 = 10016;
pub const TRADE_DISABLED: u32 = 10017;
pub const MARKET_CLOSED: u32 = 10018;
pub const NO_MONEY: u32 = 10019;
pub const PRICE_CHANGED: u32 = 10020;
pub const PRICE_OFF: u32 = 10021;
pub const INVALID_EXPIRATION: u32 = 10022;
pub const ORDER_CHANGED: u32 = 10023;
pub const TOO_MANY_REQUESTS: u32 = 10024;
pub const NO_CHANGES: u32 = 10025;
pub const SERVER_DISABLES_AT: u32 = 10026;
pub const CLIENT_DISABLES_AT: u32 = 10027;
pub const LOCKED: u32 = 10028;
pub const FROZEN: u32 = 10029;
pub const INVALID_FILL: u32 = 10030;
pub const CONNECTION: u32 = 10031;
pub const ONLY_REAL: u32 = 10032;
pub const LIMIT_ORDERS: u32 = 10033;
pub const LIMIT_VOLUME: u32 = 10034;
pub const INVALID_ORDER: u32 = 10035;
pub const POSITION_CLOSED: u32 = 10036;
pub const INVALID_CLOSE_VOLUME: u32 = 10038;
pub const CLOSE_ORDER_EXIST: u32 = 10039;
pub const LIMIT_POSITIONS: u32 = 10040;
pub const REJECT_CANCEL: u32 = 10041;
pub const LONG_ONLY: u32 = 10042;
pub const SHORT_ONLY: u32 = 10043;
pub const CLOSE_ONLY: u32 = 10044;
pub const FIFO_CLOSE: u32 = 10045;

/// `order_check` reports success as 0
pub const CHECK_OK: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retcode {
    Accepted { partial: bool },
    Rejected(RejectionClass),
}

/// Classify a trade return code
pub fn classify(code: u32) -> Retcode {
    match code {
        DONE | PLACED => Retcode::Accepted { partial: false },
        DONE_PARTIAL => Retcode::Accepted { partial: true },

        REQUOTE | PRICE_CHANGED | PRICE_OFF | TIMEOUT | TOO_MANY_REQUESTS | CONNECTION
        | ORDER_CHANGED => Retcode::Rejected(RejectionClass::Transient),

        INVALID | INVALID_VOLUME | INVALID_PRICE | INVALID_STOPS | INVALID_EXPIRATION
        | INVALID_FILL | INVALID_ORDER | INVALID_CLOSE_VOLUME | LIMIT_VOLUME | LIMIT_ORDERS
        | NO_CHANGES => Retcode::Rejected(RejectionClass::Configuration),

        // REJECT, CANCEL, ERROR, TRADE_DISABLED, MARKET_CLOSED, NO_MONEY, LOCKED, FROZEN,
        // ONLY_REAL, LIMIT_POSITIONS, LONG_ONLY and friends, plus anything unknown
        _ => Retcode::Rejected(RejectionClass::Environment),
    }
}

/// `order_check` passed
pub fn check_passed(code: u32) -> bool {
    code == CHECK_OK || code == DONE
}

pub fn describe(code: u32) -> &'static str {
    match code {
        CHECK_OK => "check ok",
        REQUOTE => "requote",
        REJECT => "request rejected",
        CANCEL => "request canceled by trader",
        PLACED => "order placed",
        DONE => "request completed",
        DONE_PARTIAL => "only part of the request was completed",
        ERROR => "request processing error",
        TIMEOUT => "request canceled by timeout",
        INVALID => "invalid request",
        INVALID_VOLUME => "invalid volume in the request",
        INVALID_PRICE => "invalid price in the request",
        INVALID_STOPS => "invalid stops in the request",
        TRADE_DISABLED => "trade is disabled",
        MARKET_CLOSED => "market is closed",
        NO_MONEY => "not enough money to complete the request",
        PRICE_CHANGED => "prices changed",
        PRICE_OFF => "no quotes to process the request",
        INVALID_EXPIRATION => "invalid order expiration date",
        ORDER_CHANGED => "order state changed",
        TOO_MANY_REQUESTS => "too frequent requests",
        NO_CHANGES => "no changes in request",
        SERVER_DISABLES_AT => "autotrading disabled by server",
        CLIENT_DISABLES_AT => "autotrading disabled by client terminal",
        LOCKED => "request locked for processing",
        FROZEN => "order or position frozen",
        INVALID_FILL => "invalid order filling type",
        CONNECTION => "no connection with the trade server",
        ONLY_REAL => "operation allowed only for live accounts",
        LIMIT_ORDERS => "pending orders limit reached",
        LIMIT_VOLUME => "volume limit reached",
        INVALID_ORDER => "incorrect or prohibited order type",
        POSITION_CLOSED => "position already closed",
        INVALID_CLOSE_VOLUME => "close volume exceeds position volume",
        CLOSE_ORDER_EXIST => "close order already exists",
        LIMIT_POSITIONS => "open positions limit reached",
        REJECT_CANCEL => "pending order activation rejected",
        LONG_ONLY => "only long positions allowed",
        SHORT_ONLY => "only short positions allowed",
        CLOSE_ONLY => "only position closing allowed",
        FIFO_CLOSE => "position closing allowed only by FIFO rule",
        _ => "unknown return code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acceptance_codes() {
        assert_eq!(classify(DONE), Retcode::Accepted { partial: false });
        assert_eq!(classify(DONE_PARTIAL), Retcode::Accepted { partial: true });
    }

    #[test]
    fn test_transient_codes() {
        for code in [REQUOTE, PRICE_CHANGED, PRICE_OFF, TIMEOUT, CONNECTION] {
            assert_eq!(classify(code), Retcode::Rejected(RejectionClass::Transient), "{}", code);
        }
    }

    #[test]
    fn test_configuration_codes() {
        for code in [INVALID_FILL, INVALID_STOPS, INVALID_VOLUME] {
            assert_eq!(classify(code), Retcode::Rejected(RejectionClass::Configuration), "{}", code);
        }
    }

    #[test]
    fn test_environment_codes() {
        for code in [MARKET_CLOSED, TRADE_DISABLED, NO_MONEY, CLIENT_DISABLES_AT, 99_999] {
            assert_eq!(classify(code), Retcode::Rejected(RejectionClass::Environment), "{}", code);
        }
    }

    #[test]
    fn test_check_passed() {
        assert!(check_passed(0));
        assert!(!check_passed(INVALID_FILL));
    }
}
