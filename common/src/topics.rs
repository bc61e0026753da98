pub const TOPIC_DEVICE_NAME: &str = "indoor/device/name";
/// Published on every broker connect (payload: MQTT client id) to ask for the name.
pub const TOPIC_DEVICE_NAME_REQUEST: &str = "indoor/device/name/request";
