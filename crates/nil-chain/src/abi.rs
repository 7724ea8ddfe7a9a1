//! Solidity shapes for the storage precompile and the EIP-712 intents

use alloy_sol_types::sol;

sol! {
    /// One session to open, as laid out in the precompile ABI
    #[derive(Debug, PartialEq, Eq)]
    struct SessionParams {
        uint64 dealId;
        string provider;
        bytes manifestRoot;
        uint64 startMduIndex;
        uint32 startBlobIndex;
        uint64 blobCount;
        uint64 nonce;
        uint64 expiresAt;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct ComputedSessionAbi {
        string provider;
        bytes32 sessionId;
    }

    function computeRetrievalSessions(SessionParams[] sessions) external view returns (ComputedSessionAbi[] computed);
    function openRetrievalSessions(SessionParams[] sessions) external returns (bytes32[] sessionIds);
    function confirmRetrievalSessions(bytes32[] sessionIds) external returns (bool ok);

    /// Range-read authorization, also used to open download sessions
    #[derive(Debug, PartialEq, Eq)]
    struct RetrievalRequest {
        uint64 deal_id;
        string file_path;
        uint64 range_start;
        uint64 range_len;
        uint64 nonce;
        uint64 expires_at;
    }
}
