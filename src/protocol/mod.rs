/*!
 * Remote storage protocols
 *
 * - UpYun REST API (multipart uploads, recursive listings)
 */

pub mod upyun;
