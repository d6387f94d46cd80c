pub mod llm;
pub mod report;
pub mod scan;

pub use llm::{
    build_provider, CompletionRequest, GatewayPolicy, LlmProvider, ProviderGateway,
    ProviderResponse, ProviderSettings, RateGate, Role, TokenUsage,
};
pub use report::{render_report, OutputFormat};
pub use scan::{
    analyzer::Analyzer, Batch, Confidence, RawFinding, ResolvedFinding, ScanConfig, ScanError,
    ScanResult, Severity, SourceFile, Verdict, VerdictStatus,
};
