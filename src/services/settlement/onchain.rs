//! Off-chain order → CTF Exchange order translation
//!
//! Amounts are collateral/share quantities with 6 decimals, truncated.

use std::str::FromStr;

use ethers::types::{Address, Bytes, H256, U256};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::blockchain::{OnChainOrder, OrderFill, Side, SignatureType};
use crate::models::{Market, Order, OrderSide, Trade};

use super::types::{SettlementError, TokenIdCalculator};

/// USDC and CTF outcome tokens both use 6 decimals
pub const COLLATERAL_DECIMALS: u32 = 6;

/// Scale a decimal quantity to on-chain units, truncating extra precision
pub fn collateral_units(value: Decimal) -> Result<U256, SettlementError> {
    if value.is_sign_negative() {
        return Err(SettlementError::InvalidOrderData(format!("negative amount {}", value)));
    }
    let scaled = (value * Decimal::from(10u64.pow(COLLATERAL_DECIMALS))).trunc();
    scaled
        .to_u128()
        .map(U256::from)
        .ok_or_else(|| SettlementError::InvalidOrderData(format!("amount out of range {}", value)))
}

/// (makerAmount, takerAmount) for an order of `amount` shares at `price`
///
/// A buyer gives collateral and receives shares; a seller the reverse.
pub fn onchain_amounts(side: OrderSide, price: Decimal, amount: Decimal) -> Result<(U256, U256), SettlementError> {
    let shares = collateral_units(amount)?;
    let collateral = collateral_units(price * amount)?;
    Ok(match side {
        OrderSide::Buy => (collateral, shares),
        OrderSide::Sell => (shares, collateral),
    })
}

pub fn parse_condition_id(market: &Market) -> Result<H256, SettlementError> {
    H256::from_str(&market.condition_id)
        .map_err(|_| SettlementError::InvalidOrderData(format!("bad condition id {}", market.condition_id)))
}

fn parse_address(field: &str, value: &str) -> Result<Address, SettlementError> {
    value
        .parse()
        .map_err(|_| SettlementError::InvalidOrderData(format!("bad {} address {}", field, value)))
}

/// The signed CTF Exchange struct an order corresponds to
pub fn onchain_order(order: &Order, token_id: U256) -> Result<OnChainOrder, SettlementError> {
    let (maker_amount, taker_amount) = onchain_amounts(order.side, order.price, order.amount)?;
    let salt = U256::from_dec_str(&order.salt)
        .map_err(|_| SettlementError::InvalidOrderData(format!("bad salt {}", order.salt)))?;
    let signature_type = SignatureType::from_code(order.signature_type).ok_or_else(|| {
        SettlementError::InvalidOrderData(format!("unknown signature type {}", order.signature_type))
    })?;
    let nonce = u64::try_from(order.nonce)
        .map_err(|_| SettlementError::InvalidOrderData(format!("negative nonce {}", order.nonce)))?;
    let expiration = u64::try_from(order.expiration)
        .map_err(|_| SettlementError::InvalidOrderData(format!("negative expiration {}", order.expiration)))?;
    let fee_rate_bps = u64::try_from(order.fee_rate_bps)
        .map_err(|_| SettlementError::InvalidOrderData(format!("negative fee rate {}", order.fee_rate_bps)))?;

    Ok(OnChainOrder {
        salt,
        maker: parse_address("maker", &order.maker)?,
        signer: parse_address("signer", &order.signer)?,
        taker: Address::zero(),
        token_id,
        maker_amount,
        taker_amount,
        expiration: U256::from(expiration),
        nonce: U256::from(nonce),
        fee_rate_bps: U256::from(fee_rate_bps),
        side: Side::from(order.side),
        signature_type,
    })
}

/// How much of the maker order a trade consumes, in maker-amount units
pub fn fill_amount(maker_order: &Order, trade: &Trade) -> Result<U256, SettlementError> {
    match maker_order.side {
        OrderSide::Buy => collateral_units(maker_order.price * trade.amount),
        OrderSide::Sell => collateral_units(trade.amount),
    }
}

/// Build the `fillOrder` arguments settling one trade.
///
/// The operator relays the maker's signed order; the taker's intent was
/// checked when the order was accepted.
pub fn to_onchain_order(
    trade: &Trade,
    maker_order: &Order,
    market: &Market,
    collateral: Address,
) -> Result<OrderFill, SettlementError> {
    if trade.maker_order_id != maker_order.id {
        return Err(SettlementError::InvalidOrderData(format!(
            "trade {} does not reference order {}",
            trade.id, maker_order.id
        )));
    }

    let token_id = TokenIdCalculator::token_id(collateral, parse_condition_id(market)?, maker_order.share_type);
    let order = onchain_order(maker_order, token_id)?;
    let signature = Bytes::from_str(&maker_order.signature)
        .map_err(|_| SettlementError::InvalidOrderData(format!("bad signature on order {}", maker_order.id)))?;

    Ok(OrderFill {
        order,
        signature,
        fill_amount: fill_amount(maker_order, trade)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderStatus, ShareType, TimeInForce};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    const MAKER: &str = "0x90f79bf6eb2c4f870365e785982e1f101e93b906";

    fn maker_order(side: OrderSide, price: Decimal, amount: Decimal) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            maker: MAKER.to_string(),
            signer: MAKER.to_string(),
            market_id: Uuid::new_v4(),
            share_type: ShareType::Yes,
            side,
            price,
            amount,
            filled_amount: dec!(0),
            status: OrderStatus::Open,
            time_in_force: TimeInForce::Gtc,
            salt: "98765432109876543210".to_string(),
            nonce: 3,
            expiration: 0,
            fee_rate_bps: 0,
            signature_type: 0,
            signature: format!("0x{}", "11".repeat(65)),
            created_at: now,
            updated_at: now,
        }
    }

    fn market() -> Market {
        let now = Utc::now();
        Market::new("q", format!("0x{}", "ab".repeat(32)), "q", now, now)
    }

    #[test]
    fn test_collateral_units_truncate() {
        assert_eq!(collateral_units(dec!(1.5)).unwrap(), U256::from(1_500_000u64));
        assert_eq!(collateral_units(dec!(0.0000019)).unwrap(), U256::from(1u64));
        assert!(collateral_units(dec!(-1)).is_err());
    }

    #[test]
    fn test_amounts_by_side() {
        let (maker, taker) = onchain_amounts(OrderSide::Buy, dec!(0.60), dec!(100)).unwrap();
        assert_eq!(maker, U256::from(60_000_000u64));
        assert_eq!(taker, U256::from(100_000_000u64));

        let (maker, taker) = onchain_amounts(OrderSide::Sell, dec!(0.60), dec!(100)).unwrap();
        assert_eq!(maker, U256::from(100_000_000u64));
        assert_eq!(taker, U256::from(60_000_000u64));
    }

    #[test]
    fn test_to_onchain_order_buy_maker() {
        let maker = maker_order(OrderSide::Buy, dec!(0.40), dec!(100));
        let taker = maker_order(OrderSide::Sell, dec!(0.40), dec!(30));
        let trade = Trade::from_fill(&taker, maker.id, &maker.maker, maker.price, dec!(30), Utc::now());
        let market = market();
        let collateral = Address::repeat_byte(0x42);

        let fill = to_onchain_order(&trade, &maker, &market, collateral).unwrap();
        assert_eq!(fill.fill_amount, U256::from(12_000_000u64));
        assert_eq!(fill.order.side, Side::Buy);
        assert_eq!(fill.order.nonce, U256::from(3u64));
        assert_eq!(fill.order.salt, U256::from_dec_str("98765432109876543210").unwrap());
        assert_eq!(fill.signature.len(), 65);
        assert_eq!(
            fill.order.token_id,
            TokenIdCalculator::token_id(collateral, parse_condition_id(&market).unwrap(), ShareType::Yes)
        );
    }

    #[test]
    fn test_sell_maker_fill_in_shares() {
        let maker = maker_order(OrderSide::Sell, dec!(0.55), dec!(10));
        let taker = maker_order(OrderSide::Buy, dec!(0.60), dec!(4));
        let trade = Trade::from_fill(&taker, maker.id, &maker.maker, maker.price, dec!(4), Utc::now());
        assert_eq!(fill_amount(&maker, &trade).unwrap(), U256::from(4_000_000u64));
    }

    #[test]
    fn test_mismatched_trade_rejected() {
        let maker = maker_order(OrderSide::Buy, dec!(0.40), dec!(100));
        let other = maker_order(OrderSide::Sell, dec!(0.40), dec!(30));
        let trade = Trade::from_fill(&other, Uuid::new_v4(), MAKER, dec!(0.40), dec!(30), Utc::now());
        let err = to_onchain_order(&trade, &maker, &market(), Address::zero()).unwrap_err();
        assert!(matches!(err, SettlementError::InvalidOrderData(_)));
    }

    #[test]
    fn test_bad_signature_type() {
        let mut order = maker_order(OrderSide::Buy, dec!(0.40), dec!(1));
        order.signature_type = 9;
        assert!(onchain_order(&order, U256::one()).is_err());
    }
}
