//! Entity layer: plain data structs for every entity kind, plus the
//! small amount of pure logic (status predicates, dedup keys) that belongs
//! with the data rather than with a component.

pub mod audit;
pub mod availability;
pub mod commodity;
pub mod location;
pub mod match_;
pub mod negotiation;
pub mod outbox;
pub mod partner;
pub mod requirement;

pub use audit::AuditEntry;
pub use availability::{Availability, AvailabilityStatus};
pub use commodity::{Commodity, RegulationSchedule};
pub use location::{haversine_km, locations_match, matches_any, LocationSpec};
pub use match_::{Match, MatchStatus, RiskDecision, ScoreBreakdown};
pub use negotiation::{Message, MessageVisibility, Negotiation, NegotiationStatus, Offer, OfferOrigin};
pub use outbox::{OutboxRecord, OutboxStatus};
pub use partner::{DocumentType, Partner, PartnerDocument, PartnerStatus, PartnerType};
pub use requirement::{Requirement, RequirementStatus, RiskPrecheckStatus};
