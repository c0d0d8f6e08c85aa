//! Contract bindings generated from human-readable ABIs
//!
//! Only the entry points the core calls are declared.

use ethers::prelude::*;

// CTF Exchange: operator-only fills of signed maker orders
abigen!(
    CTFExchangeContract,
    r#"[
        struct Order { uint256 salt; address maker; address signer; address taker; uint256 tokenId; uint256 makerAmount; uint256 takerAmount; uint256 expiration; uint256 nonce; uint256 feeRateBps; uint8 side; uint8 signatureType; bytes signature; }
        function fillOrder(Order order, uint256 fillAmount) external
        function fillOrders(Order[] orders, uint256[] fillAmounts) external
        function getOrderHash(Order order) external view returns (bytes32)
    ]"#
);

// UMA Optimistic Oracle V2
abigen!(
    OptimisticOracleV2Contract,
    r#"[
        function requestPrice(bytes32 identifier, uint256 timestamp, bytes ancillaryData, address currency, uint256 reward) external returns (uint256)
        function hasPrice(address requester, bytes32 identifier, uint256 timestamp, bytes ancillaryData) external view returns (bool)
        function getState(address requester, bytes32 identifier, uint256 timestamp, bytes ancillaryData) external view returns (uint8)
        function settle(address requester, bytes32 identifier, uint256 timestamp, bytes ancillaryData) external returns (uint256)
        function settleAndGetPrice(bytes32 identifier, uint256 timestamp, bytes ancillaryData) external returns (int256)
    ]"#
);
