//! 请求与响应的数据传输对象

pub mod request;
pub mod response;

pub use request::{
    BroadcastEventRequest, CreateEventRequest, ListEventsQuery, ModerateEventRequest,
    PatchEventRequest, TagSearchQuery, TagSuggestRequest, VersionedRequest,
};
pub use response::{
    ApiResponse, BroadcastAcceptedDto, EventListResponse, EventSummaryDto, TagListDto,
};
